//! Cooperative shutdown for the greeter processes.
//!
//! A [`Coordinator`] races one background operation (the dispatch loop or the
//! serving loop) against a termination signal. Exactly one of the two events
//! is honored:
//!
//! - The operation finishes first: its result is returned as
//!   [`Outcome::Completed`] or [`Outcome::Failed`].
//! - The signal arrives first: the operation's [`CancellationToken`] is
//!   cancelled, the operation gets a bounded window to drain, and whatever it
//!   reports afterwards is discarded in favour of [`Outcome::Signalled`].
//!
//! Resources that must be released on every exit path are wrapped in a
//! [`Guard`], which calls [`Release::release`] exactly once.

use crate::{Error, Result};
use core::fmt;
use core::future::Future;
use core::time::Duration;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// A termination notification delivered by the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// `SIGINT` (Ctrl+C).
    Interrupt,
    /// `SIGTERM`.
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "SIGINT"),
            Signal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Installed handlers for the signals that trigger shutdown.
///
/// Handlers are registered eagerly by [`Signals::install`] so a signal that
/// arrives before the coordinator starts waiting is still observed.
pub struct Signals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Signals {
    /// Registers handlers for `SIGINT` and `SIGTERM`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signals`] if the runtime refuses a handler.
    #[cfg(unix)]
    pub fn install() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).map_err(Error::Signals)?,
            terminate: signal(SignalKind::terminate()).map_err(Error::Signals)?,
        })
    }

    /// Ctrl+C is the only termination request outside unix.
    #[cfg(not(unix))]
    pub fn install() -> Result<Self> {
        Ok(Self {})
    }

    /// Waits for the next termination signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.interrupt.recv() => Signal::Interrupt,
            _ = self.terminate.recv() => Signal::Terminate,
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> Signal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            core::future::pending::<()>().await;
        }
        Signal::Interrupt
    }
}

/// How a coordinated operation ended.
#[derive(Debug)]
pub enum Outcome<E> {
    /// The operation returned `Ok(())` on its own.
    Completed,
    /// The operation reported a terminal error.
    Failed(E),
    /// The operation panicked or was cancelled by the runtime.
    Panicked(JoinError),
    /// A termination signal won the race.
    Signalled(Signal),
}

/// Races a single background operation against a termination signal.
///
/// [`Coordinator::run`] consumes the coordinator, so one instance protects one
/// operation and tears it down at most once.
#[derive(Debug)]
pub struct Coordinator {
    stop: CancellationToken,
    drain_timeout: Duration,
}

impl Coordinator {
    /// Creates a coordinator that allows `drain_timeout` for the operation to
    /// wind down after a signal before aborting it.
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            stop: CancellationToken::new(),
            drain_timeout,
        }
    }

    /// Spawns `operation` and waits for it to finish or for `shutdown` to
    /// resolve, whichever happens first.
    pub async fn run<Op, Fut, E, S>(self, operation: Op, shutdown: S) -> Outcome<E>
    where
        Op: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = core::result::Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
        S: Future<Output = Signal>,
    {
        let mut task = tokio::spawn(operation(self.stop.clone()));

        tokio::select! {
            joined = &mut task => match joined {
                Ok(Ok(())) => Outcome::Completed,
                Ok(Err(e)) => Outcome::Failed(e),
                Err(e) => Outcome::Panicked(e),
            },
            signal = shutdown => {
                tracing::info!("Received signal for shutdown: {signal}");
                self.stop.cancel();

                match tokio::time::timeout(self.drain_timeout, &mut task).await {
                    Ok(Ok(Ok(()))) => tracing::debug!("Operation drained"),
                    Ok(Ok(Err(e))) => {
                        tracing::debug!("Discarding operation error after shutdown: {e}");
                    }
                    Ok(Err(e)) => tracing::warn!("Operation did not exit cleanly: {e}"),
                    Err(_) => {
                        tracing::warn!(
                            "Operation still running after {:?}, aborting",
                            self.drain_timeout
                        );
                        task.abort();
                        let _ = task.await;
                    }
                }

                Outcome::Signalled(signal)
            }
        }
    }
}

/// A resource that needs an explicit teardown step.
pub trait Release {
    /// Tears the resource down. Called exactly once by [`Guard`].
    fn release(&mut self);
}

/// Scoped ownership of a [`Release`] resource.
///
/// The resource is released when the guard is dropped or when
/// [`Guard::release`] is called, whichever comes first, and never twice.
pub struct Guard<R: Release> {
    resource: Option<R>,
}

impl<R: Release> Guard<R> {
    pub fn new(resource: R) -> Self {
        Self {
            resource: Some(resource),
        }
    }

    /// Releases the resource now instead of at the end of the scope.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(mut resource) = self.resource.take() {
            resource.release();
        }
    }
}

impl<R: Release> core::ops::Deref for Guard<R> {
    type Target = R;

    fn deref(&self) -> &R {
        // `resource` is only taken by `release_once`, which runs from
        // `release(self)` or `drop`, after which the guard is unreachable.
        match &self.resource {
            Some(resource) => resource,
            None => unreachable!("guard used after release"),
        }
    }
}

impl<R: Release> Drop for Guard<R> {
    fn drop(&mut self) {
        self.release_once();
    }
}
