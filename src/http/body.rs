//! Response body fed by a drain task.
//!
//! `BodySink` is the drain's side, `ChunkBody` is what hyper polls. They
//! share a one-slot frame queue, so `flush` returns once hyper has taken the
//! previous frame for the connection.

use crate::streaming::{ChunkSink, StreamOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

type FrameResult = Result<Frame<Bytes>, io::Error>;

/// Create a connected sink/body pair.
pub fn body_channel(content_length: Option<u64>) -> (BodySink, ChunkBody) {
    let (tx, rx) = mpsc::channel(1);
    (BodySink { tx }, ChunkBody { rx, content_length })
}

/// Drain side of a streamed response
pub struct BodySink {
    tx: mpsc::Sender<FrameResult>,
}

#[async_trait]
impl ChunkSink for BodySink {
    async fn write(&mut self, chunk: Bytes) -> io::Result<usize> {
        let len = chunk.len();
        self.tx
            .send(Ok(Frame::data(chunk)))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))?;
        Ok(len)
    }

    async fn flush(&mut self) -> io::Result<()> {
        // The permit is only granted once the last frame has been taken.
        self.tx
            .reserve()
            .await
            .map(drop)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))
    }

    async fn abort(&mut self, outcome: &StreamOutcome) {
        let err = io::Error::other(format!("stream ended early: {outcome}"));
        let _ = self.tx.send(Err(err)).await;
    }
}

/// Body polled by hyper. Ends when the sink is dropped.
pub struct ChunkBody {
    rx: mpsc::Receiver<FrameResult>,
    content_length: Option<u64>,
}

impl Body for ChunkBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.rx.poll_recv(cx)
    }

    fn size_hint(&self) -> SizeHint {
        match self.content_length {
            Some(len) => SizeHint::with_exact(len),
            None => SizeHint::default(),
        }
    }
}
