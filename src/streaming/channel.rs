//! Channel types for the file streaming pipeline.
//!
//! ChunkSource -> [CompressingRelay] -> drain
//! Every hop is a bounded channel, so a slow consumer stalls the producers.

use bytes::Bytes;
use std::fmt;
use std::io;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Default queue depth between two pipeline stages
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Default raw read size
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024; // 64KB

/// Default compressed chunk size
pub const DEFAULT_COMPRESSION_BUFFER: usize = 32 * 1024; // 32KB

// =============================================================================
// Chunk queues
// =============================================================================

/// Producer half of a chunk queue
pub type ChunkSender = mpsc::Sender<Bytes>;

/// Consumer half of a chunk queue
pub type ChunkReceiver = mpsc::Receiver<Bytes>;

/// Create a bounded chunk queue. A depth of zero is bumped to one.
pub fn chunk_channel(depth: usize) -> (ChunkSender, ChunkReceiver) {
    mpsc::channel(depth.max(1))
}

// =============================================================================
// Terminal status
// =============================================================================

/// How a stage finished. Read after the stage's queue has closed.
#[derive(Debug)]
pub enum StreamOutcome {
    /// Every byte was produced
    Completed,

    /// The stream's cancellation token fired
    Cancelled,

    /// The downstream queue was dropped before the stream finished
    ConsumerGone,

    /// The file could not be opened; no chunk was produced
    OpenFailed(io::Error),

    /// A read failed after zero or more chunks were produced
    ReadFailed(io::Error),

    /// The compressor failed
    EncodeFailed(io::Error),
}

impl StreamOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StreamOutcome::Completed)
    }

    /// Short label for log fields
    pub fn label(&self) -> &'static str {
        match self {
            StreamOutcome::Completed => "completed",
            StreamOutcome::Cancelled => "cancelled",
            StreamOutcome::ConsumerGone => "consumer_gone",
            StreamOutcome::OpenFailed(_) => "open_failed",
            StreamOutcome::ReadFailed(_) => "read_failed",
            StreamOutcome::EncodeFailed(_) => "encode_failed",
        }
    }
}

impl fmt::Display for StreamOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamOutcome::OpenFailed(e)
            | StreamOutcome::ReadFailed(e)
            | StreamOutcome::EncodeFailed(e) => write!(f, "{}: {}", self.label(), e),
            _ => f.write_str(self.label()),
        }
    }
}

// =============================================================================
// ChunkStream: one stage's output
// =============================================================================

/// Output of a pipeline stage: ordered chunks, then a terminal status.
pub struct ChunkStream {
    rx: ChunkReceiver,
    outcome: oneshot::Receiver<StreamOutcome>,
    cancel: CancellationToken,
}

impl ChunkStream {
    pub(crate) fn new(
        rx: ChunkReceiver,
        outcome: oneshot::Receiver<StreamOutcome>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            outcome,
            cancel,
        }
    }

    /// Next chunk, or `None` once the producer has closed the queue.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Token governing every stage feeding this stream
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Signal cancellation to the producers. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drop any undelivered chunks and wait for the terminal status.
    pub async fn finish(self) -> StreamOutcome {
        let Self { rx, outcome, .. } = self;
        drop(rx);
        outcome.await.unwrap_or_else(|_| lost_producer())
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        ChunkReceiver,
        oneshot::Receiver<StreamOutcome>,
        CancellationToken,
    ) {
        (self.rx, self.outcome, self.cancel)
    }
}

impl fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Status used when a producer task exits without reporting (panic).
pub(crate) fn lost_producer() -> StreamOutcome {
    StreamOutcome::ReadFailed(io::Error::other(
        "chunk producer exited without reporting a status",
    ))
}

// =============================================================================
// Tests
// =============================================================================
