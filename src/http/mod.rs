//! HTTP/2 file serving on top of the streaming pipeline.

pub mod body;
pub mod handler;
pub mod listing;

pub use body::{body_channel, BodySink, ChunkBody};
pub use handler::{RequestHandler, ResponseBody};
