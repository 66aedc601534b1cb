use std::{future::Future, io, net::SocketAddr};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};

use crate::{connection::CountingConnection, counter::ConnectionCounter};

/// Source of incoming connections.
pub trait Listener {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    fn accept(&self) -> impl Future<Output = io::Result<(Self::Io, SocketAddr)>> + Send;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Listener for TcpListener {
    type Io = TcpStream;
    fn accept(&self) -> impl Future<Output = io::Result<(Self::Io, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Wraps a listener so that every accepted connection is counted until it
/// is closed. Dropping it closes the wrapped listener.
pub struct CountingListener<L> {
    inner: L,
    counter: ConnectionCounter,
}

impl<L: Listener> CountingListener<L> {
    pub fn new(inner: L, counter: ConnectionCounter) -> Self {
        Self { inner, counter }
    }

    /// Accepts the next connection. The counter only moves once the wrapped
    /// listener has produced a connection; errors are returned untouched.
    pub async fn accept(&self) -> io::Result<(CountingConnection<L::Io>, SocketAddr)> {
        let (io, addr) = self.inner.accept().await?;
        Ok((CountingConnection::new(io, &self.counter), addr))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn counter(&self) -> &ConnectionCounter {
        &self.counter
    }
}
