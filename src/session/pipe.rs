//! Bounded byte pipes
//!
//! A pipe carries [`Bytes`] chunks from any number of [`PipeWriter`] handles
//! to any number of [`PipeReader`] handles. It holds at most `capacity`
//! buffered bytes (a single oversized chunk is admitted into an empty pipe).
//!
//! Closing is idempotent and available from both ends:
//! - [`close`](PipeWriter::close) ends the stream cleanly; readers drain what
//!   is buffered and then see end of stream.
//! - [`close_error`](PipeWriter::close_error) discards buffered data and makes
//!   every pending and future read or write fail.
//!
//! Dropping the last writer (or the last reader) of a pipe that is still open
//! error-closes it.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::io::{ChunkReader, ChunkWriter};

/// Default bytes a pipe buffers before writers wait (64KB)
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Lifecycle state of a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeStatus {
    /// Accepting writes
    Open,
    /// Closed cleanly; buffered data can still be read
    Closed,
    /// Closed with an error; all operations fail
    Errored,
}

#[derive(Debug)]
struct PipeState {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    status: PipeStatus,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<PipeState>,
    capacity: usize,
    readable: Notify,
    writable: Notify,
    writers: AtomicUsize,
    readers: AtomicUsize,
}

impl Shared {
    fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.status != PipeStatus::Open {
                return;
            }
            state.status = PipeStatus::Closed;
        }
        self.wake_all();
    }

    fn close_error(&self) {
        {
            let mut state = self.state.lock();
            if state.status == PipeStatus::Errored {
                return;
            }
            state.status = PipeStatus::Errored;
            state.chunks.clear();
            state.buffered = 0;
        }
        self.wake_all();
    }

    fn status(&self) -> PipeStatus {
        self.state.lock().status
    }

    fn buffered(&self) -> usize {
        self.state.lock().buffered
    }

    fn wake_all(&self) {
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    fn abandon(&self) {
        if self.status() == PipeStatus::Open {
            self.close_error();
        }
    }
}

fn closed_with_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "pipe closed with error")
}

/// Create a pipe buffering at most `capacity` bytes
#[must_use]
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(PipeState {
            chunks: VecDeque::new(),
            buffered: 0,
            status: PipeStatus::Open,
        }),
        capacity: capacity.max(1),
        readable: Notify::new(),
        writable: Notify::new(),
        writers: AtomicUsize::new(1),
        readers: AtomicUsize::new(1),
    });
    (
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    )
}

/// Writing end of a pipe
#[derive(Debug)]
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Append a chunk, waiting while the pipe is full.
    ///
    /// # Errors
    ///
    /// `BrokenPipe` after a clean close, `ConnectionAborted` after an
    /// error-close.
    pub async fn write(&self, chunk: Bytes) -> io::Result<()> {
        loop {
            let notified = self.shared.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                match state.status {
                    PipeStatus::Errored => return Err(closed_with_error()),
                    PipeStatus::Closed => {
                        return Err(io::Error::new(
                            io::ErrorKind::BrokenPipe,
                            "write to closed pipe",
                        ))
                    }
                    PipeStatus::Open => {}
                }
                if chunk.is_empty() {
                    return Ok(());
                }
                if state.buffered == 0 || state.buffered + chunk.len() <= self.shared.capacity {
                    state.buffered += chunk.len();
                    state.chunks.push_back(chunk);
                    drop(state);
                    self.shared.readable.notify_waiters();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Close the pipe cleanly
    pub fn close(&self) {
        self.shared.close();
    }

    /// Close the pipe with an error
    pub fn close_error(&self) {
        self.shared.close_error();
    }

    /// Current state
    #[must_use]
    pub fn status(&self) -> PipeStatus {
        self.shared.status()
    }

    /// Bytes waiting to be read
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.shared.buffered()
    }
}

impl Clone for PipeWriter {
    fn clone(&self) -> Self {
        self.shared.writers.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if self.shared.writers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.abandon();
        }
    }
}

#[async_trait]
impl ChunkWriter for PipeWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.write(chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.close();
        Ok(())
    }
}

/// Reading end of a pipe
#[derive(Debug)]
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Take the next chunk, waiting while the pipe is empty.
    ///
    /// Returns `Ok(None)` once the pipe is closed cleanly and drained.
    ///
    /// # Errors
    ///
    /// `ConnectionAborted` after an error-close.
    pub async fn read(&self) -> io::Result<Option<Bytes>> {
        loop {
            let notified = self.shared.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                if state.status == PipeStatus::Errored {
                    return Err(closed_with_error());
                }
                if let Some(chunk) = state.chunks.pop_front() {
                    state.buffered -= chunk.len();
                    drop(state);
                    self.shared.writable.notify_waiters();
                    return Ok(Some(chunk));
                }
                if state.status == PipeStatus::Closed {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }

    /// Close the pipe cleanly
    pub fn close(&self) {
        self.shared.close();
    }

    /// Close the pipe with an error
    pub fn close_error(&self) {
        self.shared.close_error();
    }

    /// Current state
    #[must_use]
    pub fn status(&self) -> PipeStatus {
        self.shared.status()
    }
}

impl Clone for PipeReader {
    fn clone(&self) -> Self {
        self.shared.readers.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        if self.shared.readers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.abandon();
        }
    }
}

#[async_trait]
impl ChunkReader for PipeReader {
    async fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        self.read().await
    }
}
