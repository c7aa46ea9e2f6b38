//! ChunkSource: reads a file in fixed-size blocks onto a bounded queue.

use crate::streaming::channel::{chunk_channel, ChunkSender, ChunkStream, StreamOutcome};
use bytes::{Bytes, BytesMut};
use std::io;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Start streaming `path` in blocks of at most `block_size` bytes.
///
/// Returns immediately. The file is opened by the producer task; if that
/// fails the returned stream closes without a chunk and reports
/// [`StreamOutcome::OpenFailed`]. Cancellation is checked after every read
/// and while waiting for queue space, never in the middle of a read.
pub fn begin_chunk_stream(
    path: impl Into<PathBuf>,
    block_size: usize,
    queue_depth: usize,
    cancel: CancellationToken,
) -> ChunkStream {
    let path = path.into();
    let block_size = block_size.max(1);
    let (tx, rx) = chunk_channel(queue_depth);
    let (outcome_tx, outcome_rx) = oneshot::channel();

    let token = cancel.clone();
    tokio::spawn(async move {
        let outcome = produce(path, block_size, tx, token).await;
        let _ = outcome_tx.send(outcome);
    });

    ChunkStream::new(rx, outcome_rx, cancel)
}

/// What ended a block read
enum ReadEnd {
    /// Block is full, more may follow
    More,
    Eof,
    Failed(io::Error),
}

/// Read until `block_size` bytes are buffered, end of file, or an error.
/// Bytes read before an error are kept.
async fn fill_block(file: &mut File, block_size: usize) -> (Bytes, ReadEnd) {
    let mut buf = BytesMut::with_capacity(block_size);
    while buf.len() < block_size {
        match file.read_buf(&mut buf).await {
            Ok(0) => return (buf.freeze(), ReadEnd::Eof),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return (buf.freeze(), ReadEnd::Failed(e)),
        }
    }
    (buf.freeze(), ReadEnd::More)
}

async fn produce(
    path: PathBuf,
    block_size: usize,
    tx: ChunkSender,
    cancel: CancellationToken,
) -> StreamOutcome {
    // Dropped on every return below, which also closes the queue.
    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "open failed");
            return StreamOutcome::OpenFailed(e);
        }
    };

    let mut sent = 0u64;
    loop {
        let (block, end) = fill_block(&mut file, block_size).await;

        // A block read before cancellation was noticed is dropped.
        if cancel.is_cancelled() {
            tracing::debug!(path = %path.display(), sent, "stream cancelled");
            return StreamOutcome::Cancelled;
        }

        if !block.is_empty() {
            let len = block.len();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(path = %path.display(), sent, "stream cancelled");
                    return StreamOutcome::Cancelled;
                }
                res = tx.send(block) => {
                    if res.is_err() {
                        tracing::debug!(path = %path.display(), sent, "chunk consumer gone");
                        return StreamOutcome::ConsumerGone;
                    }
                }
            }
            sent += len as u64;
            tracing::trace!(path = %path.display(), len, "raw chunk queued");
        }

        match end {
            ReadEnd::More => {}
            ReadEnd::Eof => return StreamOutcome::Completed,
            ReadEnd::Failed(e) => {
                tracing::warn!(path = %path.display(), sent, error = %e, "read failed mid-stream");
                return StreamOutcome::ReadFailed(e);
            }
        }
    }
}
