//! Re-buffering writer.
//!
//! Compressors push output in small, irregular writes. `RebufferWriter`
//! collects them into chunks of at most `capacity` bytes and parks each
//! finished chunk on a ready list, which the owner drains between writes.
//!
//! Policy for an incoming slice `p` with accumulator `acc`:
//! - `acc.len() + p.len() <= capacity`: append.
//! - otherwise `acc` (if non-empty) becomes ready, then
//!   - `p.len() > capacity`: `p` becomes ready as its own chunk, unbuffered;
//!   - else start the next accumulator with `p`.
//!
//! Every ready chunk is therefore `<= capacity` except pass-through chunks,
//! whose length is exactly the length of the slice that produced them.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::io::{self, Write};

#[derive(Debug)]
pub struct RebufferWriter {
    buf: BytesMut,
    capacity: usize,
    ready: VecDeque<Bytes>,
}

impl RebufferWriter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            ready: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held back
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Move the partial accumulator onto the ready list. Called once, after
    /// the compressor finished.
    pub fn finish(&mut self) {
        self.seal_buffered();
    }

    /// Hand over every finished chunk, oldest first.
    pub fn take_ready(&mut self) -> VecDeque<Bytes> {
        std::mem::take(&mut self.ready)
    }

    fn seal_buffered(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let chunk = std::mem::replace(&mut self.buf, BytesMut::with_capacity(self.capacity));
        self.ready.push_back(chunk.freeze());
    }
}

impl Write for RebufferWriter {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        if self.buf.len() + p.len() > self.capacity {
            self.seal_buffered();

            if p.len() > self.capacity {
                self.ready.push_back(Bytes::copy_from_slice(p));
                return Ok(p.len());
            }
        }

        self.buf.extend_from_slice(p);
        Ok(p.len())
    }

    /// No-op: chunk boundaries are decided by size only, and the compressor
    /// flushing its own state must not force a short chunk.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
