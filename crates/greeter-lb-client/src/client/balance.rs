//! Per-call backend selection over a fixed set of monitored subchannels.
//!
//! [`BalancedChannel`] is a `tower::Service` that the generated
//! `GreeterClient` can drive like a plain tonic `Channel`. Every resolved
//! backend gets a background monitor that dials it, subscribes to its gRPC
//! health `Watch` stream and publishes a [`Subchannel`] state:
//!
//! - [`Subchannel::Connecting`] until the first dial attempt settles,
//! - [`Subchannel::Ready`] while the backend reports `SERVING`,
//! - [`Subchannel::TransientFailure`] after a refused dial, a health stream
//!   that ends or reports anything but `SERVING`, or a transport failure on a
//!   call. The monitor redials after the backoff.
//!
//! Calls are only ever routed to ready subchannels, chosen by a [`Picker`]:
//!
//! - [`Picker::RoundRobin`] rotates through the ready subchannels.
//! - [`Picker::PickFirst`] stays on the first ready subchannel in resolution
//!   order and moves to the next one only once it leaves the ready state.
//!
//! While no subchannel is ready but some are still connecting, a call waits
//! for the next state change (bounded by the caller's deadline). Once every
//! subchannel is in transient failure, calls fail fast with `UNAVAILABLE`.

use crate::client::policy::Policy;
use core::task::{Context, Poll};
use core::time::Duration;
use futures::future::BoxFuture;
use greeter_lb_core::proto::greeter_server::SERVICE_NAME;
use portable_atomic::{AtomicUsize, Ordering};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tonic::body::Body;
use tonic::codegen::http;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tonic_health::pb::{
    HealthCheckRequest, health_check_response::ServingStatus, health_client::HealthClient,
};
use tower::{BoxError, Service, ServiceExt};

/// Connectivity of one backend as seen by the picker.
#[derive(Debug, Clone)]
pub enum Subchannel {
    Connecting,
    Ready(Channel),
    TransientFailure,
}

impl Subchannel {
    pub fn is_ready(&self) -> bool {
        matches!(self, Subchannel::Ready(_))
    }
}

/// What a [`Picker`] decided for one call.
#[derive(Debug)]
pub enum Pick {
    /// Route the call to this backend.
    Ready(usize, Channel),
    /// Nothing is ready yet but a backend is still connecting.
    Wait,
    /// Every backend is in transient failure.
    Unavailable,
}

/// Chooses the backend for each call.
#[derive(Debug)]
pub enum Picker {
    RoundRobin { next: AtomicUsize },
    PickFirst { pinned: AtomicUsize },
}

impl Picker {
    pub fn new(policy: Policy) -> Self {
        match policy {
            Policy::RoundRobin => Picker::RoundRobin {
                next: AtomicUsize::new(0),
            },
            Policy::PickFirst => Picker::PickFirst {
                pinned: AtomicUsize::new(0),
            },
        }
    }

    pub fn policy(&self) -> Policy {
        match self {
            Picker::RoundRobin { .. } => Policy::RoundRobin,
            Picker::PickFirst { .. } => Policy::PickFirst,
        }
    }

    /// Picks a ready subchannel for the next call.
    pub fn pick(&self, subchannels: &[Subchannel]) -> Pick {
        let n = subchannels.len();
        match self {
            Picker::RoundRobin { next } => {
                for _ in 0..n {
                    let index = next.fetch_add(1, Ordering::Relaxed) % n;
                    if let Subchannel::Ready(channel) = &subchannels[index] {
                        return Pick::Ready(index, channel.clone());
                    }
                }
                if subchannels
                    .iter()
                    .any(|s| matches!(s, Subchannel::Connecting))
                {
                    Pick::Wait
                } else {
                    Pick::Unavailable
                }
            }
            Picker::PickFirst { pinned } => {
                // Walk forward from the pin: a backend that is still connecting
                // is waited for rather than skipped, so the pin only ever lands
                // on the first backend that is actually reachable.
                let start = pinned.load(Ordering::Acquire);
                for offset in 0..n {
                    let index = (start + offset) % n;
                    match &subchannels[index] {
                        Subchannel::Ready(channel) => {
                            pinned.store(index, Ordering::Release);
                            return Pick::Ready(index, channel.clone());
                        }
                        Subchannel::Connecting => return Pick::Wait,
                        Subchannel::TransientFailure => {}
                    }
                }
                Pick::Unavailable
            }
        }
    }
}

/// One resolved backend instance.
#[derive(Debug, Clone)]
pub struct Backend {
    pub addr: SocketAddr,
    pub endpoint: Endpoint,
}

/// State shared between the channel and the per-backend monitors.
#[derive(Debug)]
struct Shared {
    states: watch::Sender<Vec<Subchannel>>,
    failed: Vec<Notify>,
    stop: CancellationToken,
}

impl Shared {
    /// Publishes `state` for `index` unless the channel has been shut down.
    fn set(&self, index: usize, state: Subchannel) {
        self.states.send_if_modified(|states| {
            if self.stop.is_cancelled() {
                return false;
            }
            let changed = states[index].is_ready() != state.is_ready()
                || matches!(
                    (&states[index], &state),
                    (Subchannel::Connecting, _) | (_, Subchannel::Connecting)
                );
            states[index] = state;
            changed
        });
    }

    fn shutdown(&self) {
        self.stop.cancel();
        self.states.send_modify(|states| {
            states.fill(Subchannel::TransientFailure);
        });
    }
}

#[derive(Debug)]
struct Inner {
    addrs: Vec<SocketAddr>,
    picker: Picker,
    shared: Arc<Shared>,
}

impl Inner {
    async fn select(&self) -> Result<(usize, Channel), Status> {
        let mut states = self.shared.states.subscribe();
        loop {
            let pick = self.picker.pick(&states.borrow_and_update());
            match pick {
                Pick::Ready(index, channel) => return Ok((index, channel)),
                Pick::Unavailable => {
                    return Err(Status::unavailable("no reachable backend"));
                }
                Pick::Wait => {
                    if states.changed().await.is_err() {
                        return Err(Status::unavailable("connection closed"));
                    }
                }
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

/// A cloneable, multi-backend channel with client-side load balancing.
#[derive(Debug, Clone)]
pub struct BalancedChannel {
    inner: Arc<Inner>,
}

impl BalancedChannel {
    /// Starts one monitor per backend and returns the channel routing over
    /// them, or `None` if `backends` is empty.
    ///
    /// `backoff` is the delay between redial attempts of a failed backend.
    /// Must be called from within a tokio runtime.
    pub fn new(backends: Vec<Backend>, policy: Policy, backoff: Duration) -> Option<Self> {
        if backends.is_empty() {
            return None;
        }

        let (states, _) = watch::channel(vec![Subchannel::Connecting; backends.len()]);
        let shared = Arc::new(Shared {
            states,
            failed: backends.iter().map(|_| Notify::new()).collect(),
            stop: CancellationToken::new(),
        });

        for (index, backend) in backends.iter().enumerate() {
            tokio::spawn(monitor(
                index,
                backend.clone(),
                Arc::clone(&shared),
                backoff,
            ));
        }

        Some(Self {
            inner: Arc::new(Inner {
                addrs: backends.into_iter().map(|b| b.addr).collect(),
                picker: Picker::new(policy),
                shared,
            }),
        })
    }

    pub fn policy(&self) -> Policy {
        self.inner.picker.policy()
    }

    /// The resolved backend addresses, in resolution order.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.inner.addrs.clone()
    }

    /// The addresses of the backends currently ready to take calls.
    pub fn ready_addrs(&self) -> Vec<SocketAddr> {
        let states = self.inner.shared.states.borrow();
        self.inner
            .addrs
            .iter()
            .zip(states.iter())
            .filter(|(_, state)| state.is_ready())
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// Waits until at least `count` backends are ready or every backend has
    /// settled, and returns the number of ready backends.
    pub async fn settle(&self, count: usize) -> usize {
        let mut states = self.inner.shared.states.subscribe();
        loop {
            let (ready, connecting) = {
                let states = states.borrow_and_update();
                (
                    states.iter().filter(|s| s.is_ready()).count(),
                    states
                        .iter()
                        .any(|s| matches!(s, Subchannel::Connecting)),
                )
            };
            if ready >= count || !connecting || states.changed().await.is_err() {
                return ready;
            }
        }
    }

    /// Stops every monitor and drops all backend connections. Calls made
    /// afterwards fail with `UNAVAILABLE`.
    pub fn shutdown(&self) {
        self.inner.shared.shutdown();
    }
}

impl Service<http::Request<Body>> for BalancedChannel {
    type Response = http::Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Backend selection happens per call inside `call`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        let inner = Arc::clone(&self.inner);

        Box::pin(async move {
            let (index, channel) = inner.select().await?;
            let addr = inner.addrs[index];
            tracing::trace!("Routing call to {addr}");
            channel.oneshot(request).await.map_err(|e| {
                tracing::warn!("Call to {addr} failed in transport: {e}");
                inner.shared.failed[index].notify_one();
                BoxError::from(e)
            })
        })
    }
}

/// Keeps the subchannel state of one backend current until shutdown.
async fn monitor(index: usize, backend: Backend, shared: Arc<Shared>, backoff: Duration) {
    let Backend { addr, endpoint } = backend;
    let stop = shared.stop.clone();

    loop {
        let connected = tokio::select! {
            () = stop.cancelled() => break,
            connected = endpoint.connect() => connected,
        };

        match connected {
            Ok(channel) => {
                tracing::debug!("Connected to {addr}");
                let reason = tokio::select! {
                    () = stop.cancelled() => break,
                    () = shared.failed[index].notified() => "a call failed in transport".to_string(),
                    reason = watch_health(&shared, index, channel) => reason,
                };
                tracing::warn!("Backend {addr} is no longer ready: {reason}");
            }
            Err(e) => tracing::warn!("Backend {addr} unreachable: {e}"),
        }

        shared.set(index, Subchannel::TransientFailure);
        tokio::select! {
            () = stop.cancelled() => break,
            () = tokio::time::sleep(backoff) => {}
        }
    }

    tracing::debug!("Stopped monitoring {addr}");
}

/// Follows the backend's health stream, publishing readiness as it changes.
/// Returns why the backend stopped being usable.
async fn watch_health(shared: &Shared, index: usize, channel: Channel) -> String {
    let request = HealthCheckRequest {
        service: SERVICE_NAME.to_string(),
    };
    let mut updates = match HealthClient::new(channel.clone()).watch(request).await {
        Ok(response) => response.into_inner(),
        Err(status) if status.code() == Code::Unimplemented => {
            // No health service: an established connection counts as ready
            // until a call fails on it.
            shared.set(index, Subchannel::Ready(channel));
            return core::future::pending().await;
        }
        Err(status) => return format!("health watch rejected: {status}"),
    };

    loop {
        match updates.message().await {
            Ok(Some(update)) if update.status == ServingStatus::Serving as i32 => {
                shared.set(index, Subchannel::Ready(channel.clone()));
            }
            Ok(Some(update)) => {
                return format!("health status {}", update.status().as_str_name());
            }
            Ok(None) => return "health stream ended".to_string(),
            Err(status) => return format!("health stream failed: {status}"),
        }
    }
}
