use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::counter::{ConnectionCounter, ConnectionGuard};

/// A connection that is accounted for in a [`ConnectionCounter`].
///
/// The count is released exactly once: on the first call to
/// [`CountingConnection::close`], or when the connection is dropped if it
/// was never closed explicitly. Dropping is how hyper lets go of a finished
/// connection and how a force-closed connection task tears down its socket,
/// so the guard does not depend on the HTTP layer calling `close` at all.
#[derive(Debug)]
pub struct CountingConnection<IO> {
    inner: IO,
    guard: ConnectionGuard,
}

impl<IO> CountingConnection<IO> {
    pub(crate) fn new(inner: IO, counter: &ConnectionCounter) -> Self {
        Self {
            inner,
            guard: counter.track(),
        }
    }

    pub fn get_ref(&self) -> &IO {
        &self.inner
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_released()
    }
}

impl<IO: AsyncWrite + Unpin> CountingConnection<IO> {
    /// Releases the count, then shuts down the write half of the
    /// connection. The shutdown result is returned as is; the count is
    /// released even when it fails.
    pub async fn close(&mut self) -> io::Result<()> {
        self.guard.release();
        self.inner.shutdown().await
    }
}

impl<IO: AsyncRead + Unpin> AsyncRead for CountingConnection<IO> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<IO: AsyncWrite + Unpin> AsyncWrite for CountingConnection<IO> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
