//! I/O utilities for tproxy-door
//!
//! This module provides the relay building blocks: chunked reader and writer
//! adapters, the one-directional relay loop and the inactivity timer that
//! polices both directions of a connection.

mod chunk;
mod pump;
mod timer;

pub use chunk::{
    ChunkReader, ChunkWriter, StreamReader, StreamWriter, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE,
    MIN_BUFFER_SIZE,
};
pub use pump::{pipe_until_eof, CopyResult};
pub use timer::{cancel_after_inactivity, ActivityTimer};
