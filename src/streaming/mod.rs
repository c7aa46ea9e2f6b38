//! Streaming file pipeline.
//!
//! Serves a file without holding it in memory. Each stage is its own task
//! and stages only talk through bounded queues.
//!
//! # Architecture
//!
//! ```text
//! +--------------+     +------------------+     +--------------+
//! | ChunkSource  | --> | CompressingRelay | --> |    drain     |
//! | (file read)  |     | (encode+rebuffer)|     | (write+flush)|
//! +--------------+     +------------------+     +--------------+
//!        ^                  (optional)                 |
//!        +--------------- cancellation ----------------+
//! ```
//!
//! Queue closure is the only end-of-stream signal on the data path. Each
//! stage additionally reports a [`StreamOutcome`] once it has closed its
//! queue, so callers can tell a clean end from a truncated one.

pub mod channel;
pub mod pipeline;
pub mod rebuffer;
pub mod relay;
pub mod source;

pub use channel::{
    chunk_channel, ChunkReceiver, ChunkSender, ChunkStream, StreamOutcome,
    DEFAULT_BLOCK_SIZE, DEFAULT_COMPRESSION_BUFFER, DEFAULT_QUEUE_DEPTH,
};
pub use pipeline::{
    drain, file_extension, ChunkSink, CompressionPolicy, DrainReport, Framing, IoSink,
    ReadSettings, StreamPlan,
};
pub use rebuffer::RebufferWriter;
pub use relay::{apply_compression, Encoding, RelayConfig, DEFAULT_LEVEL};
pub use source::begin_chunk_stream;
