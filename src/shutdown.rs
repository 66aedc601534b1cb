use std::time::Duration;

use crate::{
    counter::ConnectionCounter,
    error::{ServerError, ServerResult},
    server::ServerHandle,
};

/// How long in-flight connections may keep running after a shutdown starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Close every connection as soon as the shutdown starts.
    Immediate,
    /// Let connections finish, force-closing any still open at the deadline.
    Bounded(Duration),
}

impl ShutdownPolicy {
    pub fn from_duration(grace_period: Duration) -> Self {
        if grace_period.is_zero() {
            Self::Immediate
        } else {
            Self::Bounded(grace_period)
        }
    }
}

/// How the connections still open at shutdown went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every connection finished on its own.
    Drained,
    /// These many connections were closed out from under their requests.
    Forced { dropped: usize },
}

impl std::fmt::Display for ShutdownOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Drained => write!(f, "all connections finished"),
            Self::Forced { dropped } => write!(f, "{dropped} connection(s) force-closed"),
        }
    }
}

pub struct ShutdownSignal(tokio::sync::mpsc::Receiver<()>);

impl ShutdownSignal {
    fn new() -> (tokio::sync::mpsc::Sender<()>, Self) {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        (tx, Self(rx))
    }
    /// A signal fired by hand. Dropping the trigger also fires it.
    pub fn manual() -> (ShutdownTrigger, Self) {
        let (tx, signal) = Self::new();
        (ShutdownTrigger(tx), signal)
    }
    pub async fn wait(mut self) {
        let _ = self.0.recv().await;
    }
}

pub struct ShutdownTrigger(tokio::sync::mpsc::Sender<()>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.0.try_send(());
    }
}

/// Fires on SIGINT or SIGTERM. Can only be installed once per process.
pub fn termination() -> ServerResult<ShutdownSignal> {
    let (tx, signal) = ShutdownSignal::new();
    ctrlc::set_handler(move || {
        log::info!(target: "drain", "Received termination signal");
        let _ = tx.try_send(());
    })?;
    Ok(signal)
}

/// Turns a termination signal into a server shutdown that follows the
/// configured [`ShutdownPolicy`].
pub struct ShutdownCoordinator {
    handle: ServerHandle,
    counter: ConnectionCounter,
    policy: ShutdownPolicy,
}

impl ShutdownCoordinator {
    pub fn new(handle: ServerHandle, counter: ConnectionCounter, policy: ShutdownPolicy) -> Self {
        Self {
            handle,
            counter,
            policy,
        }
    }

    /// Waits for `signal`, then stops the server. Returns `None` when the
    /// server had already stopped by itself.
    ///
    /// A bounded shutdown that had to force-close connections at its deadline
    /// fails with [`ServerError::GracePeriodElapsed`].
    pub async fn run(self, signal: ShutdownSignal) -> ServerResult<Option<ShutdownOutcome>> {
        signal.wait().await;

        log::info!(target: "drain", "Shutting down the server");
        log::info!(
            target: "drain",
            "Current connections on serving: {}",
            self.counter.count()
        );
        match self.policy {
            ShutdownPolicy::Immediate => {
                log::info!(target: "drain", "No grace period, closing every connection now")
            }
            ShutdownPolicy::Bounded(grace) => log::info!(
                target: "drain",
                "Server is going to be shutdown after at most {:?}",
                grace
            ),
        }

        match self.handle.shutdown(self.policy).await {
            Ok(ShutdownOutcome::Forced { dropped }) if self.is_bounded() => {
                Err(ServerError::GracePeriodElapsed { dropped })
            }
            Ok(outcome) => {
                log::info!(target: "drain", "Server stopped: {outcome}");
                Ok(Some(outcome))
            }
            Err(e) if e.is_already_stopped() => {
                log::info!(target: "drain", "Server was already stopped");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn is_bounded(&self) -> bool {
        matches!(self.policy, ShutdownPolicy::Bounded(_))
    }

    /// Like [`ShutdownCoordinator::run`], but a failed shutdown ends the
    /// process with status 1.
    pub async fn run_or_exit(self, signal: ShutdownSignal) -> Option<ShutdownOutcome> {
        match self.run(signal).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!(target: "drain", "Server shutdown error: {e}");
                std::process::exit(1);
            }
        }
    }
}
