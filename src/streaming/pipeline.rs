//! Pipeline driver.
//!
//! Decides whether a file is compressed, assembles the stages for it, and
//! drains the final stream into a sink, flushing after every chunk.

use crate::streaming::channel::{ChunkStream, StreamOutcome};
use crate::streaming::relay::{apply_compression, Encoding, RelayConfig, DEFAULT_LEVEL};
use crate::streaming::source::begin_chunk_stream;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Compression decision
// =============================================================================

/// When and how files are compressed in flight
#[derive(Debug, Clone)]
pub struct CompressionPolicy {
    pub enabled: bool,
    /// Files smaller than this are sent as-is
    pub threshold: u64,
    pub excluded_extensions: HashSet<String>,
    /// Target size of compressed chunks
    pub buffer_size: usize,
    pub encoding: Encoding,
    pub level: i32,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0,
            excluded_extensions: HashSet::new(),
            buffer_size: crate::streaming::DEFAULT_COMPRESSION_BUFFER,
            encoding: Encoding::Gzip,
            level: DEFAULT_LEVEL,
        }
    }
}

impl CompressionPolicy {
    /// Compress iff enabled, `size >= threshold`, and the extension is not
    /// excluded.
    pub fn should_compress(&self, size: u64, file_name: &str) -> bool {
        if !self.enabled || size < self.threshold {
            return false;
        }
        !self
            .excluded_extensions
            .contains(file_extension(file_name))
    }
}

/// Final dot-delimited segment of `file_name`. A name without a dot is its
/// own extension.
pub fn file_extension(file_name: &str) -> &str {
    file_name.rsplit('.').next().unwrap_or(file_name)
}

// =============================================================================
// Stream plan
// =============================================================================

/// How the response body is framed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Raw bytes, total length known upfront
    Sized(u64),
    /// Compressed, length unknown until the stream ends
    Encoded(Encoding),
}

/// Per-file read settings
#[derive(Debug, Clone, Copy)]
pub struct ReadSettings {
    pub block_size: usize,
    pub queue_depth: usize,
}

/// A started pipeline for one file
#[derive(Debug)]
pub struct StreamPlan {
    pub framing: Framing,
    pub stream: ChunkStream,
}

impl StreamPlan {
    /// Start reading `path` and interpose the relay if `compress` is set.
    pub fn start(
        path: impl Into<PathBuf>,
        size: u64,
        compress: bool,
        read: ReadSettings,
        policy: &CompressionPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let raw = begin_chunk_stream(path, read.block_size, read.queue_depth, cancel);
        if !compress {
            return Self {
                framing: Framing::Sized(size),
                stream: raw,
            };
        }

        let stream = apply_compression(
            raw,
            RelayConfig {
                encoding: policy.encoding,
                level: policy.level,
                buffer_size: policy.buffer_size,
                queue_depth: read.queue_depth,
            },
        );
        Self {
            framing: Framing::Encoded(policy.encoding),
            stream,
        }
    }

    /// Start a pipeline for `path`, applying the policy's decision rule.
    pub fn for_file(
        path: impl Into<PathBuf>,
        file_name: &str,
        size: u64,
        read: ReadSettings,
        policy: &CompressionPolicy,
        cancel: CancellationToken,
    ) -> Self {
        let compress = policy.should_compress(size, file_name);
        Self::start(path, size, compress, read, policy, cancel)
    }
}

// =============================================================================
// Drain
// =============================================================================

/// Destination of a drained stream
#[async_trait]
pub trait ChunkSink: Send {
    /// Write one chunk, returning the number of bytes accepted.
    async fn write(&mut self, chunk: Bytes) -> io::Result<usize>;

    /// Push written data towards the peer.
    async fn flush(&mut self) -> io::Result<()>;

    /// The stream ended without completing. Sinks that can signal truncation
    /// to their peer do so here.
    async fn abort(&mut self, _outcome: &StreamOutcome) {}
}

/// [`ChunkSink`] over any tokio writer
pub struct IoSink<W> {
    inner: W,
}

impl<W> IoSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W> ChunkSink for IoSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, chunk: Bytes) -> io::Result<usize> {
        self.inner.write_all(&chunk).await?;
        Ok(chunk.len())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }
}

/// Result of draining one stream
#[derive(Debug)]
pub struct DrainReport {
    pub chunks: u64,
    pub bytes: u64,
    pub outcome: StreamOutcome,
}

/// Write every chunk of `stream` to `sink`, flushing after each one.
///
/// A failing sink cancels the stream and yields
/// [`StreamOutcome::ConsumerGone`]. If the stream itself did not complete,
/// the sink is told via [`ChunkSink::abort`].
pub async fn drain<S>(mut stream: ChunkStream, sink: &mut S) -> DrainReport
where
    S: ChunkSink + ?Sized,
{
    let mut chunks = 0u64;
    let mut bytes = 0u64;

    while let Some(chunk) = stream.next().await {
        let len = chunk.len();
        let res = match sink.write(chunk).await {
            Ok(n) if n == len => sink.flush().await,
            Ok(n) => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sink accepted {n} of {len} bytes"),
            )),
            Err(e) => Err(e),
        };

        if let Err(e) = res {
            tracing::debug!(chunks, bytes, error = %e, "sink failed, cancelling stream");
            stream.cancel();
            // Wait for the producers to wind down before reporting.
            let _ = stream.finish().await;
            return DrainReport {
                chunks,
                bytes,
                outcome: StreamOutcome::ConsumerGone,
            };
        }

        chunks += 1;
        bytes += len as u64;
    }

    let outcome = stream.finish().await;
    if !outcome.is_completed() {
        sink.abort(&outcome).await;
    }

    DrainReport {
        chunks,
        bytes,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn policy(excluded: &[&str]) -> CompressionPolicy {
        CompressionPolicy {
            enabled: true,
            threshold: 100,
            excluded_extensions: excluded.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("a.jpg"), "jpg");
        assert_eq!(file_extension("archive.tar.gz"), "gz");
        assert_eq!(file_extension("README"), "README");
        assert_eq!(file_extension(".bashrc"), "bashrc");
        assert_eq!(file_extension("trailing."), "");
    }

    #[test]
    fn test_excluded_extension_is_not_compressed() {
        let p = policy(&["jpg"]);
        assert!(!p.should_compress(10_000, "a.jpg"));
        assert!(p.should_compress(10_000, "a.txt"));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let p = policy(&[]);
        assert!(!p.should_compress(99, "a.txt"));
        assert!(p.should_compress(100, "a.txt"));
    }

    #[test]
    fn test_disabled_policy_never_compresses() {
        let p = CompressionPolicy {
            enabled: false,
            ..policy(&[])
        };
        assert!(!p.should_compress(u64::MAX, "a.txt"));
    }

    #[test]
    fn test_extensionless_name_matches_only_itself() {
        let p = policy(&["Makefile"]);
        assert!(!p.should_compress(1000, "Makefile"));
        assert!(p.should_compress(1000, "README"));
    }

    /// Sink that accepts a fixed number of chunks, then fails.
    struct FailingSink {
        accept: usize,
        written: Vec<Bytes>,
        flushes: usize,
        aborted: Option<&'static str>,
    }

    impl FailingSink {
        fn accepting(accept: usize) -> Self {
            Self {
                accept,
                written: Vec::new(),
                flushes: 0,
                aborted: None,
            }
        }
    }

    #[async_trait]
    impl ChunkSink for FailingSink {
        async fn write(&mut self, chunk: Bytes) -> io::Result<usize> {
            if self.written.len() == self.accept {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            let len = chunk.len();
            self.written.push(chunk);
            Ok(len)
        }

        async fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }

        async fn abort(&mut self, outcome: &StreamOutcome) {
            self.aborted = Some(outcome.label());
        }
    }

    #[tokio::test]
    async fn test_drain_flushes_after_every_chunk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.bin");
        fs::write(&path, vec![3u8; 5000]).unwrap();

        let plan = StreamPlan::start(
            &path,
            5000,
            false,
            ReadSettings {
                block_size: 1000,
                queue_depth: 2,
            },
            &CompressionPolicy::default(),
            CancellationToken::new(),
        );
        assert_eq!(plan.framing, Framing::Sized(5000));

        let mut sink = FailingSink::accepting(usize::MAX);
        let report = drain(plan.stream, &mut sink).await;

        assert!(report.outcome.is_completed());
        assert_eq!(report.chunks, 5);
        assert_eq!(report.bytes, 5000);
        assert_eq!(sink.flushes, 5);
        assert!(sink.aborted.is_none());
    }

    #[tokio::test]
    async fn test_read_failure_aborts_sink() {
        // Reading a directory fails after a successful open.
        let tmp = TempDir::new().unwrap();
        let plan = StreamPlan::start(
            tmp.path(),
            0,
            true,
            ReadSettings {
                block_size: 1024,
                queue_depth: 2,
            },
            &CompressionPolicy::default(),
            CancellationToken::new(),
        );

        let mut sink = FailingSink::accepting(usize::MAX);
        let report = drain(plan.stream, &mut sink).await;

        assert!(matches!(report.outcome, StreamOutcome::ReadFailed(_)));
        assert_eq!(report.chunks, 0);
        assert_eq!(sink.aborted, Some("read_failed"));
    }

    #[tokio::test]
    async fn test_failing_sink_cancels_stream() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.bin");
        fs::write(&path, vec![3u8; 100_000]).unwrap();

        let token = CancellationToken::new();
        let stream = begin_chunk_stream(&path, 1000, 2, token.clone());
        let mut sink = FailingSink::accepting(3);
        let report = drain(stream, &mut sink).await;

        assert!(matches!(report.outcome, StreamOutcome::ConsumerGone));
        assert_eq!(report.chunks, 3);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_io_sink_collects_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        fs::write(&path, b"hello pipeline").unwrap();

        let stream = begin_chunk_stream(&path, 4, 2, CancellationToken::new());
        let mut sink = IoSink::new(Vec::new());
        let report = drain(stream, &mut sink).await;

        assert!(report.outcome.is_completed());
        assert_eq!(report.chunks, 4);
        assert_eq!(sink.into_inner(), b"hello pipeline");
    }
}
