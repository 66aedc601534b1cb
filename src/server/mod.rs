mod logging;
mod onion;
mod service;

use crate::{
    connection::CountingConnection,
    counter::ConnectionCounter,
    error::{ServerError, ServerResult},
    listener::{CountingListener, Listener},
    shutdown::{ShutdownOutcome, ShutdownPolicy},
};
use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request};
use hyper_util::rt::TokioIo;
use nix::errno::Errno;
use onion::{Service, ServiceStack};
use service::{AddStateLayer, DelayService};
use std::{
    convert::Infallible,
    io,
    net::SocketAddr,
    pin::pin,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::{mpsc, oneshot},
    task::{JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;

const WAIT_STOP_PRINT: Duration = Duration::from_secs(5);
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Lifecycle of a [`Server`]. It only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    /// Accepting and serving connections.
    Serving = 0,
    /// No longer accepting; open connections are finishing or being closed.
    Draining = 1,
    /// No connection is left.
    Stopped = 2,
}

impl From<u8> for ServerState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Serving,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

struct StopRequest {
    policy: ShutdownPolicy,
    done: oneshot::Sender<ShutdownOutcome>,
}

/// Cloneable remote control for a running [`Server`].
#[derive(Clone)]
pub struct ServerHandle {
    stop: mpsc::Sender<StopRequest>,
    state: Arc<AtomicU8>,
}

impl ServerHandle {
    pub fn state(&self) -> ServerState {
        self.state.load(Ordering::SeqCst).into()
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Stops accepting connections and winds down the open ones according to
    /// `policy`, returning once the server is stopped.
    ///
    /// Callers racing each other all get the outcome of the first request.
    /// Fails with [`ServerError::AlreadyStopped`] once the server is gone.
    pub async fn shutdown(&self, policy: ShutdownPolicy) -> ServerResult<ShutdownOutcome> {
        let (done, outcome) = oneshot::channel();
        self.stop
            .send(StopRequest { policy, done })
            .await
            .map_err(|_| ServerError::AlreadyStopped)?;
        outcome.await.map_err(|_| ServerError::ShutdownInterrupted)
    }
}

pub struct ServerBuilder {
    bind: Option<SocketAddr>,
    counter: Option<ConnectionCounter>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        ServerBuilder {
            bind: None,
            counter: None,
        }
    }
    pub fn bind(mut self, bind: SocketAddr) -> Self {
        log::info!(target: "drain", "Will bind to: {}", bind);
        self.bind = Some(bind);
        self
    }
    pub fn counter(mut self, counter: ConnectionCounter) -> Self {
        self.counter = Some(counter);
        self
    }
    /// Binds the listening socket. Connections queue up from here on, but
    /// are only accepted once [`Server::serve`] runs.
    pub async fn listen(self) -> ServerResult<Server> {
        let bind = self.bind.ok_or(ServerError::MissingArgument("bind"))?;
        let listener = TcpListener::bind(bind).await?;
        Ok(self.with_listener(listener))
    }
    /// Serves on a listener that is already bound. The bind address, if
    /// any, is ignored.
    pub fn with_listener<L: Listener>(self, listener: L) -> Server<L> {
        let counter = self.counter.unwrap_or_else(|| {
            log::debug!(target: "drain", "No connection counter given. Using a fresh one.");
            ConnectionCounter::new()
        });
        let (stop_tx, stop_rx) = mpsc::channel(8);
        let handle = ServerHandle {
            stop: stop_tx,
            state: Arc::new(AtomicU8::new(ServerState::Serving as u8)),
        };
        Server {
            listener: CountingListener::new(listener, counter),
            stop: stop_rx,
            handle,
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Server<L = TcpListener> {
    listener: CountingListener<L>,
    stop: mpsc::Receiver<StopRequest>,
    handle: ServerHandle,
}

impl<L: Listener> Server<L> {
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }
    pub fn counter(&self) -> &ConnectionCounter {
        self.listener.counter()
    }
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until a stop request arrives through a
    /// [`ServerHandle`], then drains them and returns.
    ///
    /// Transient accept errors (aborted handshakes, exhausted file
    /// descriptors) are logged and retried with a growing backoff. Any other
    /// accept error is returned, and open connections are dropped with it.
    pub async fn serve(self) -> ServerResult<()> {
        let Server {
            listener,
            mut stop,
            handle,
        } = self;
        let counter = listener.counter().clone();
        let draining = CancellationToken::new();
        let mut connections = JoinSet::new();
        let mut backoff: Option<Duration> = None;

        let request = loop {
            tokio::select! {
                Some(request) = stop.recv() => break request,
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    report_finished(finished);
                }
                accepted = listener.accept() => match accepted {
                    Ok((conn, client_addr)) => {
                        backoff = None;
                        log::debug!(target: "drain", "Accepted connection from {}", client_addr);
                        connections.spawn(serve_connection(
                            conn,
                            client_addr,
                            draining.clone(),
                            counter.clone(),
                        ));
                    }
                    Err(e) if is_transient(&e) => {
                        let delay = backoff
                            .map_or(ACCEPT_BACKOFF_MIN, |d| (d * 2).min(ACCEPT_BACKOFF_MAX));
                        backoff = Some(delay);
                        log::warn!(target: "drain", "Accept error: {}; retrying in {:?}", e, delay);
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => {
                        log::error!(target: "drain", "Unable to accept connection: {}", e);
                        handle.set_state(ServerState::Stopped);
                        return Err(e.into());
                    }
                },
            }
        };

        handle.set_state(ServerState::Draining);
        drop(listener);
        log::info!(
            target: "drain",
            "Stopped accepting connections, {} still open",
            counter.count()
        );

        let outcome = match request.policy {
            ShutdownPolicy::Immediate => force_close(&mut connections, &counter).await,
            ShutdownPolicy::Bounded(grace) => {
                draining.cancel();
                match tokio::time::timeout(grace, drain(&mut connections, &counter)).await {
                    Ok(()) => ShutdownOutcome::Drained,
                    Err(_) => {
                        log::warn!(
                            target: "drain",
                            "Grace period of {:?} elapsed with {} connection(s) still open",
                            grace,
                            counter.count()
                        );
                        force_close(&mut connections, &counter).await
                    }
                }
            }
        };

        handle.set_state(ServerState::Stopped);
        let _ = request.done.send(outcome);
        stop.close();
        while let Ok(late) = stop.try_recv() {
            let _ = late.done.send(outcome);
        }
        Ok(())
    }
}

/// Accept errors that say nothing about the listener itself: the peer gave
/// up mid-handshake, or the process is out of descriptors or buffers for now.
fn is_transient(e: &io::Error) -> bool {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => true,
        _ => matches!(
            e.raw_os_error().map(Errno::from_raw),
            Some(Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM)
        ),
    }
}

fn report_finished(finished: Result<(), JoinError>) {
    if let Err(e) = finished {
        if e.is_panic() {
            log::error!(target: "drain", "Connection task panicked: {}", e);
        }
    }
}

/// Waits for every connection task to end on its own.
async fn drain(connections: &mut JoinSet<()>, counter: &ConnectionCounter) {
    let mut report = tokio::time::interval_at(
        tokio::time::Instant::now() + WAIT_STOP_PRINT,
        WAIT_STOP_PRINT,
    );
    loop {
        tokio::select! {
            finished = connections.join_next() => match finished {
                Some(finished) => report_finished(finished),
                None => break,
            },
            _ = report.tick() => log::info!(
                target: "drain",
                "Active connections = {}, waiting for all connections to stop.",
                counter.count()
            ),
        }
    }
}

/// Aborts every connection task. Their sockets are dropped along with them.
async fn force_close(
    connections: &mut JoinSet<()>,
    counter: &ConnectionCounter,
) -> ShutdownOutcome {
    let dropped = counter.count();
    connections.abort_all();
    while let Some(finished) = connections.join_next().await {
        report_finished(finished);
    }
    if dropped == 0 {
        ShutdownOutcome::Drained
    } else {
        log::warn!(target: "drain", "Force-closed {} connection(s)", dropped);
        ShutdownOutcome::Forced { dropped }
    }
}

async fn serve_connection<IO>(
    conn: CountingConnection<IO>,
    client_addr: SocketAddr,
    draining: CancellationToken,
    counter: ConnectionCounter,
) where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = ServiceStack::new(DelayService)
        .layer(logging::AccessLogLayer::new(counter))
        .layer(AddStateLayer::new(client_addr.ip()))
        .build();
    let service = &service;

    let conn = http1::Builder::new().serve_connection(
        TokioIo::new(conn),
        service_fn(move |req: Request<Incoming>| async move {
            Ok::<_, Infallible>(service.call(req).await.unwrap_or_else(Into::into))
        }),
    );
    let mut conn = pin!(conn);

    let mut finishing = false;
    let result = loop {
        tokio::select! {
            result = conn.as_mut() => break result,
            _ = draining.cancelled(), if !finishing => {
                finishing = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    if let Err(e) = result {
        log::error!(target: "drain", "Connection error: {}", e);
    }
}
