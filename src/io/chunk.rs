//! Chunked reader and writer abstractions
//!
//! The relay loops move [`Bytes`] chunks between a [`ChunkReader`] and a
//! [`ChunkWriter`]. Stream halves are adapted with [`StreamReader`] and
//! [`StreamWriter`]; session pipes implement the traits directly.

use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default bytes read from a stream per chunk (16KB)
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Minimum chunk size (1KB)
pub const MIN_BUFFER_SIZE: usize = 1024;

/// Maximum chunk size (1MB)
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Source of byte chunks
#[async_trait]
pub trait ChunkReader: Send {
    /// Read the next chunk; `Ok(None)` signals a clean end of stream.
    async fn read_chunk(&mut self) -> io::Result<Option<Bytes>>;
}

/// Sink of byte chunks
#[async_trait]
pub trait ChunkWriter: Send {
    /// Write a whole chunk
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()>;

    /// Signal that no more chunks follow
    async fn finish(&mut self) -> io::Result<()>;
}

/// Reads bounded chunks from an `AsyncRead`
#[derive(Debug)]
pub struct StreamReader<R> {
    inner: R,
    buf: BytesMut,
    chunk_size: usize,
}

impl<R> StreamReader<R> {
    /// Create a reader with the default chunk size
    pub fn new(inner: R) -> Self {
        Self::with_chunk_size(inner, DEFAULT_BUFFER_SIZE)
    }

    /// Create a reader producing chunks of at most `chunk_size` bytes
    pub fn with_chunk_size(inner: R, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        Self {
            inner,
            buf: BytesMut::with_capacity(chunk_size),
            chunk_size,
        }
    }

    /// Maximum chunk size
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Recover the wrapped reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[async_trait]
impl<R> ChunkReader for StreamReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        self.buf.reserve(self.chunk_size);
        let limit = self.chunk_size as u64;
        let n = (&mut self.inner).take(limit).read_buf(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf.split().freeze()))
    }
}

/// Writes chunks to an `AsyncWrite`, shutting it down on finish
#[derive(Debug)]
pub struct StreamWriter<W> {
    inner: W,
}

impl<W> StreamWriter<W> {
    /// Wrap a writer
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Recover the wrapped writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W> ChunkWriter for StreamWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.inner.write_all(&chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.inner.flush().await?;
        self.inner.shutdown().await
    }
}
