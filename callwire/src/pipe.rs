//! Byte-stream pipe ends and the pending output-pipe table.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::unix::pipe as os_pipe;

use crate::error::{Error, Result};
use crate::id::{CallerId, RequestId};

/// Owned read end of a byte pipe. Dropping it closes the end.
pub struct PipeReader {
    /// Underlying stream.
    inner: Box<dyn AsyncRead + Send + Unpin>,
}

impl PipeReader {
    /// Wraps any async byte source.
    pub fn new(inner: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeReader").finish_non_exhaustive()
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Owned write end of a byte pipe. Dropping it signals EOF to the reader.
pub struct PipeWriter {
    /// Underlying stream.
    inner: Box<dyn AsyncWrite + Send + Unpin>,
}

impl PipeWriter {
    /// Wraps any async byte sink.
    pub fn new(inner: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeWriter").finish_non_exhaustive()
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Creates an OS pipe registered with the current tokio runtime.
///
/// Must be called from within a runtime.
pub fn pipe() -> io::Result<(PipeReader, PipeWriter)> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let (rx, tx) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)?;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let (rx, tx) = nix::unistd::pipe()?;

    let receiver = os_pipe::Receiver::from_owned_fd(rx)?;
    let sender = os_pipe::Sender::from_owned_fd(tx)?;
    Ok((PipeReader::new(receiver), PipeWriter::new(sender)))
}

/// Output pipes created for a caller but not yet consumed by a call.
///
/// Keyed by `(caller, request_id)` so two callers reusing the same id never
/// collide. Each entry is consumed at most once.
#[derive(Debug, Default)]
pub struct PendingPipes {
    /// Write ends awaiting their call.
    entries: Mutex<HashMap<(CallerId, RequestId), PipeWriter>>,
}

impl PendingPipes {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pipe, keeps its write end, and returns the read end.
    pub fn create(&self, caller: CallerId, request_id: RequestId) -> Result<PipeReader> {
        let (reader, writer) = pipe()?;
        self.insert(caller, request_id, writer)?;
        Ok(reader)
    }

    /// Parks an existing write end.
    pub fn insert(
        &self,
        caller: CallerId,
        request_id: RequestId,
        writer: PipeWriter,
    ) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.entry((caller, request_id)) {
            Entry::Occupied(_) => Err(Error::PipeInUse { caller, request_id }),
            Entry::Vacant(slot) => {
                slot.insert(writer);
                Ok(())
            }
        }
    }

    /// Removes and returns the write end. A second call fails.
    pub fn consume(&self, caller: CallerId, request_id: RequestId) -> Result<PipeWriter> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(caller, request_id))
            .ok_or(Error::PipeNotFound { caller, request_id })
    }

    /// Drops every pending pipe of `caller`, returning how many were closed.
    pub fn discard_caller(&self, caller: CallerId) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(owner, _), _| *owner != caller);
        before - entries.len()
    }

    /// Number of pending pipes.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no pipes are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn pipe_carries_bytes_then_eof() {
        let (mut reader, mut writer) = pipe().unwrap();
        writer.write_all(b"hello").await.unwrap();
        drop(writer);

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn consume_is_single_use() {
        let pipes = PendingPipes::new();
        let caller = CallerId::from(7);
        let id = RequestId::from(1);
        let _reader = pipes.create(caller, id).unwrap();

        assert!(pipes.consume(caller, id).is_ok());
        assert!(matches!(
            pipes.consume(caller, id),
            Err(Error::PipeNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn same_id_from_two_callers_does_not_collide() {
        let pipes = PendingPipes::new();
        let id = RequestId::from(5);
        let _a = pipes.create(CallerId::from(1), id).unwrap();
        let _b = pipes.create(CallerId::from(2), id).unwrap();
        assert_eq!(pipes.len(), 2);

        assert!(matches!(
            pipes.create(CallerId::from(1), id),
            Err(Error::PipeInUse { .. })
        ));
    }

    #[tokio::test]
    async fn discard_caller_closes_its_pipes() {
        let pipes = PendingPipes::new();
        let gone = CallerId::from(1);
        let mut reader = pipes.create(gone, RequestId::from(1)).unwrap();
        let _other = pipes.create(CallerId::from(2), RequestId::from(1)).unwrap();

        assert_eq!(pipes.discard_caller(gone), 1);
        assert_eq!(pipes.len(), 1);

        let mut buf = Vec::new();
        assert_eq!(reader.read_to_end(&mut buf).await.unwrap(), 0);
    }
}
