//! One-directional relay loop
//!
//! [`pipe_until_eof`] moves chunks from a reader to a writer until the
//! reader reports a clean end of stream, an I/O error occurs, or the
//! cancellation token fires. Every blocking step races the token.

use std::io;

use tokio_util::sync::CancellationToken;

use super::chunk::{ChunkReader, ChunkWriter};
use super::timer::ActivityTimer;
use crate::error::IdleTimeout;

/// Bytes moved by a finished connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyResult {
    /// Bytes transferred from client to upstream
    pub client_to_upstream: u64,
    /// Bytes transferred from upstream to client
    pub upstream_to_client: u64,
}

impl CopyResult {
    /// Total bytes transferred in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.client_to_upstream + self.upstream_to_client
    }
}

/// Copy chunks from `reader` to `writer` until end of stream.
///
/// On clean EOF the writer is finished and the number of bytes moved is
/// returned. `timer`, when given, is updated after every written chunk.
///
/// # Errors
///
/// Returns the first read or write error. Cancellation is reported as an
/// [`IdleTimeout`] error (kind `TimedOut`) when `timer` expired and as
/// `ErrorKind::Interrupted` otherwise.
pub async fn pipe_until_eof<R, W>(
    reader: &mut R,
    writer: &mut W,
    cancel: &CancellationToken,
    timer: Option<&ActivityTimer>,
) -> io::Result<u64>
where
    R: ChunkReader + ?Sized,
    W: ChunkWriter + ?Sized,
{
    let mut transferred = 0u64;

    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled_error(timer)),
            chunk = reader.read_chunk() => chunk?,
        };

        let Some(chunk) = chunk else {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled_error(timer)),
                finished = writer.finish() => finished?,
            }
            return Ok(transferred);
        };

        let len = chunk.len() as u64;
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled_error(timer)),
            written = writer.write_chunk(chunk) => written?,
        }

        transferred += len;
        if let Some(timer) = timer {
            timer.update();
        }
    }
}

fn cancelled_error(timer: Option<&ActivityTimer>) -> io::Error {
    if timer.is_some_and(ActivityTimer::is_expired) {
        IdleTimeout.into()
    } else {
        io::Error::new(io::ErrorKind::Interrupted, "transfer cancelled")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::io::chunk::{StreamReader, StreamWriter};
    use crate::io::timer::cancel_after_inactivity;

    #[test]
    fn test_copy_result_total() {
        let result = CopyResult {
            client_to_upstream: 100,
            upstream_to_client: 200,
        };
        assert_eq!(result.total(), 300);
    }

    #[tokio::test]
    async fn test_pipe_until_eof_copies_in_order() {
        let (mut source, source_far) = duplex(1024);
        let (sink_far, mut sink) = duplex(1024);

        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let expected = data.clone();
        let feeder = tokio::spawn(async move {
            source.write_all(&data).await.unwrap();
            source.shutdown().await.unwrap();
        });
        let drain = tokio::spawn(async move {
            let mut out = Vec::new();
            sink.read_to_end(&mut out).await.unwrap();
            out
        });

        let mut reader = StreamReader::new(source_far);
        let mut writer = StreamWriter::new(sink_far);
        let cancel = CancellationToken::new();
        let moved = pipe_until_eof(&mut reader, &mut writer, &cancel, None)
            .await
            .unwrap();
        drop(writer);

        feeder.await.unwrap();
        assert_eq!(moved, expected.len() as u64);
        assert_eq!(drain.await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_blocked_read() {
        let (_source, source_far) = duplex(64);
        let (sink_far, _sink) = duplex(64);
        let mut reader = StreamReader::new(source_far);
        let mut writer = StreamWriter::new(sink_far);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = pipe_until_eof(&mut reader, &mut writer, &cancel, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_reported_as_timed_out() {
        let (_source, source_far) = duplex(64);
        let (sink_far, _sink) = duplex(64);
        let mut reader = StreamReader::new(source_far);
        let mut writer = StreamWriter::new(sink_far);

        let parent = CancellationToken::new();
        let (cancel, timer) = cancel_after_inactivity(&parent, Duration::from_secs(1));

        let err = pipe_until_eof(&mut reader, &mut writer, &cancel, Some(&timer))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(err.get_ref().is_some_and(|inner| inner.is::<IdleTimeout>()));
    }

    #[tokio::test]
    async fn test_write_error_propagates() {
        let (mut source, source_far) = duplex(64);
        let (sink_far, sink) = duplex(64);
        drop(sink);

        source.write_all(b"data").await.unwrap();
        let mut reader = StreamReader::new(source_far);
        let mut writer = StreamWriter::new(sink_far);
        let cancel = CancellationToken::new();

        let err = pipe_until_eof(&mut reader, &mut writer, &cancel, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
