//! h2serve - stream files over HTTPS/2.
//!
//! Files are read in fixed-size blocks by a producer task, optionally
//! compressed and re-chunked by a relay, and written out chunk by chunk with
//! a flush after each one. Every stage hands data through a bounded queue,
//! so a slow client throttles the disk reads instead of growing memory.

pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod server;
pub mod streaming;
pub mod tls;

pub use error::{Error, Result};
