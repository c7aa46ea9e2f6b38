//! CompressingRelay: raw chunks -> streaming encoder -> re-buffered chunks.
//!
//! The encoders are push-style `std::io::Write` adapters over a
//! [`RebufferWriter`]. The relay is an ordinary task: it feeds one raw chunk
//! to the encoder, then sends whatever chunks became ready, so it only ever
//! waits on its queues and never parks a runtime thread. It owns the encoder
//! and the accumulator for the stream's lifetime.

use crate::streaming::channel::{
    chunk_channel, lost_producer, ChunkSender, ChunkStream, StreamOutcome,
};
use crate::streaming::rebuffer::RebufferWriter;
use bytes::Bytes;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Encoder level used when none is configured (the fastest regular level of both encoders)
pub const DEFAULT_LEVEL: i32 = 1;

/// Content encoding produced by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Gzip,
    Zstd,
}

impl Encoding {
    /// Token used in `Content-Encoding` / `Accept-Encoding`
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gzip" => Ok(Encoding::Gzip),
            "zstd" => Ok(Encoding::Zstd),
            other => Err(format!("unsupported encoding: {other}")),
        }
    }
}

/// One encoder instance, owned by one relay.
enum Compressor<W: Write> {
    Gzip(GzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Compressor<W> {
    fn new(encoding: Encoding, level: i32, inner: W) -> io::Result<Self> {
        match encoding {
            Encoding::Gzip => {
                let level = flate2::Compression::new(level.clamp(0, 9) as u32);
                Ok(Compressor::Gzip(GzEncoder::new(inner, level)))
            }
            Encoding::Zstd => Ok(Compressor::Zstd(zstd::stream::write::Encoder::new(
                inner, level,
            )?)),
        }
    }

    fn get_mut(&mut self) -> &mut W {
        match self {
            Compressor::Gzip(enc) => enc.get_mut(),
            Compressor::Zstd(enc) => enc.get_mut(),
        }
    }

    /// Write the trailer and hand back the inner writer
    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Gzip(enc) => enc.finish(),
            Compressor::Zstd(enc) => enc.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Gzip(enc) => enc.write(buf),
            Compressor::Zstd(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Gzip(enc) => enc.flush(),
            Compressor::Zstd(enc) => enc.flush(),
        }
    }
}

/// Relay settings
#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    pub encoding: Encoding,
    pub level: i32,
    /// Target size of emitted chunks
    pub buffer_size: usize,
    pub queue_depth: usize,
}

/// Wrap `upstream` with a compressing relay.
///
/// Returns immediately. The returned stream closes after the encoder has
/// been finished and the last partial chunk emitted, or early if upstream
/// did not complete, the consumer went away, or the token fired while the
/// relay was waiting on a full queue.
///
/// Must be called from within a tokio runtime.
pub fn apply_compression(upstream: ChunkStream, config: RelayConfig) -> ChunkStream {
    let (tx, rx) = chunk_channel(config.queue_depth);
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let cancel = upstream.cancel_token().clone();

    let token = cancel.clone();
    tokio::spawn(async move {
        let outcome = relay(upstream, config, tx, token).await;
        let _ = outcome_tx.send(outcome);
    });

    ChunkStream::new(rx, outcome_rx, cancel)
}

async fn relay(
    upstream: ChunkStream,
    config: RelayConfig,
    tx: ChunkSender,
    cancel: CancellationToken,
) -> StreamOutcome {
    let (mut raw, upstream_outcome, _) = upstream.into_parts();

    let writer = RebufferWriter::new(config.buffer_size);
    let mut encoder = match Compressor::new(config.encoding, config.level, writer) {
        Ok(enc) => enc,
        Err(e) => return encode_failed(e),
    };

    while let Some(chunk) = raw.recv().await {
        if let Err(e) = encoder.write_all(&chunk) {
            return encode_failed(e);
        }
        let ready = encoder.get_mut().take_ready();
        if let Err(outcome) = emit(&tx, &cancel, ready).await {
            return outcome;
        }
    }

    let upstream_outcome = upstream_outcome.await.unwrap_or_else(|_| lost_producer());
    if !upstream_outcome.is_completed() {
        // No trailer for a truncated stream. Encoder state and the partial
        // accumulator are discarded with it, so compressed output for bytes
        // already read but not yet emitted is lost.
        return upstream_outcome;
    }

    let mut writer = match encoder.finish() {
        Ok(writer) => writer,
        Err(e) => return encode_failed(e),
    };
    writer.finish();
    match emit(&tx, &cancel, writer.take_ready()).await {
        Ok(()) => StreamOutcome::Completed,
        Err(outcome) => outcome,
    }
}

/// Queue compressed chunks in order, waiting under backpressure.
async fn emit(
    tx: &ChunkSender,
    cancel: &CancellationToken,
    chunks: VecDeque<Bytes>,
) -> Result<(), StreamOutcome> {
    for chunk in chunks {
        let len = chunk.len();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("relay cancelled");
                return Err(StreamOutcome::Cancelled);
            }
            res = tx.send(chunk) => {
                if res.is_err() {
                    tracing::debug!("compressed chunk consumer gone");
                    return Err(StreamOutcome::ConsumerGone);
                }
            }
        }
        tracing::trace!(len, "compressed chunk queued");
    }
    Ok(())
}

fn encode_failed(e: io::Error) -> StreamOutcome {
    tracing::warn!(error = %e, "compression failed");
    StreamOutcome::EncodeFailed(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::source::begin_chunk_stream;
    use flate2::read::GzDecoder;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    fn config(encoding: Encoding, buffer_size: usize) -> RelayConfig {
        RelayConfig {
            encoding,
            level: DEFAULT_LEVEL,
            buffer_size,
            queue_depth: 4,
        }
    }

    async fn collect(mut stream: ChunkStream) -> (Vec<Bytes>, StreamOutcome) {
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk);
        }
        (chunks, stream.finish().await)
    }

    fn pseudo_random(len: usize) -> Vec<u8> {
        let mut x: u32 = 0x9E37_79B9;
        (0..len)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                x as u8
            })
            .collect()
    }

    #[test]
    fn test_encoding_parse() {
        assert_eq!("gzip".parse::<Encoding>().unwrap(), Encoding::Gzip);
        assert_eq!("ZSTD".parse::<Encoding>().unwrap(), Encoding::Zstd);
        assert!("br".parse::<Encoding>().is_err());
        assert_eq!(Encoding::default(), Encoding::Gzip);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_gzip_relay_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("text.txt");
        let content = b"the quick brown fox jumps over the lazy dog\n".repeat(2000);
        fs::write(&path, &content).unwrap();

        let raw = begin_chunk_stream(&path, 4096, 4, CancellationToken::new());
        let compressed = apply_compression(raw, config(Encoding::Gzip, 1024));
        let (chunks, outcome) = collect(compressed).await;

        assert!(outcome.is_completed());
        assert!(chunks.iter().all(|c| !c.is_empty()));

        let mut decoded = Vec::new();
        GzDecoder::new(&chunks.concat()[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, content);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_zstd_relay_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("noise.bin");
        let content = pseudo_random(200_000);
        fs::write(&path, &content).unwrap();

        let raw = begin_chunk_stream(&path, 16 * 1024, 4, CancellationToken::new());
        let compressed = apply_compression(raw, config(Encoding::Zstd, 8 * 1024));
        let (chunks, outcome) = collect(compressed).await;

        assert!(outcome.is_completed());
        let decoded = zstd::stream::decode_all(&chunks.concat()[..]).unwrap();
        assert_eq!(decoded, content);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_file_still_gets_a_valid_stream() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty");
        fs::write(&path, b"").unwrap();

        let raw = begin_chunk_stream(&path, 1024, 4, CancellationToken::new());
        let (chunks, outcome) = collect(apply_compression(raw, config(Encoding::Gzip, 512))).await;

        assert!(outcome.is_completed());
        let mut decoded = Vec::new();
        GzDecoder::new(&chunks.concat()[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert!(decoded.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_open_failure_forwards_outcome() {
        let tmp = TempDir::new().unwrap();
        let raw = begin_chunk_stream(
            tmp.path().join("missing"),
            1024,
            4,
            CancellationToken::new(),
        );
        let (chunks, outcome) = collect(apply_compression(raw, config(Encoding::Gzip, 512))).await;

        assert!(chunks.is_empty());
        assert!(matches!(outcome, StreamOutcome::OpenFailed(_)));
    }

    #[tokio::test]
    async fn test_read_failure_forwarded_without_trailer() {
        // A directory opens fine on Linux, then the first read fails.
        let tmp = TempDir::new().unwrap();
        let raw = begin_chunk_stream(tmp.path(), 1024, 4, CancellationToken::new());
        let (chunks, outcome) = collect(apply_compression(raw, config(Encoding::Gzip, 512))).await;

        assert!(chunks.is_empty());
        assert!(matches!(outcome, StreamOutcome::ReadFailed(_)));
    }

    #[tokio::test]
    async fn test_relay_runs_on_current_thread_runtime() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("text.txt");
        let content = b"single threaded\n".repeat(4000);
        fs::write(&path, &content).unwrap();

        let raw = begin_chunk_stream(&path, 4096, 1, CancellationToken::new());
        let compressed = apply_compression(
            raw,
            RelayConfig {
                queue_depth: 1,
                ..config(Encoding::Zstd, 256)
            },
        );
        let (chunks, outcome) = collect(compressed).await;

        assert!(outcome.is_completed());
        assert_eq!(zstd::stream::decode_all(&chunks.concat()[..]).unwrap(), content);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_unblocks_stalled_relay() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("noise.bin");
        fs::write(&path, pseudo_random(1024 * 1024)).unwrap();

        let token = CancellationToken::new();
        let raw = begin_chunk_stream(&path, 4096, 1, token.clone());
        let mut compressed = apply_compression(
            raw,
            RelayConfig {
                queue_depth: 1,
                ..config(Encoding::Gzip, 1024)
            },
        );

        // Take one chunk, then stop reading so both queues fill up.
        compressed.next().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        token.cancel();

        let mut drained = 0;
        while compressed.next().await.is_some() {
            drained += 1;
        }
        assert!(drained <= 1);
        assert!(matches!(compressed.finish().await, StreamOutcome::Cancelled));
    }
}
