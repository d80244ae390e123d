//! Establishing the load-balanced connection.
//!
//! [`connect`] turns a logical target address and a service-config payload
//! into a [`Connection`]. Dialing happens in the background: every resolved
//! instance gets a monitor that connects to it and tracks its health, so a
//! connection is returned before any backend is known to be reachable.

use crate::client::{
    balance::{Backend, BalancedChannel},
    policy::{Policy, ServiceConfig},
};
use core::time::Duration;
use greeter_lb_core::{
    Error, Result,
    proto::greeter_client::GreeterClient,
    shutdown::Release,
};
use std::net::SocketAddr;
use tonic::{codec::CompressionEncoding, transport::Endpoint};

/// Scheme prefix accepted in front of each target entry.
pub const DNS_SCHEME: &str = "dns:///";

/// Tuning knobs for [`connect`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Upper bound for establishing the TCP/HTTP2 connection to one backend.
    pub connect_timeout: Duration,
    /// Delay before redialing a backend that failed or stopped serving.
    pub backoff: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            backoff: Duration::from_secs(1),
        }
    }
}

/// A logical, possibly multi-backend connection to the greeter service.
///
/// Owned by the process that dialed it and released exactly once, normally
/// through a [`greeter_lb_core::shutdown::Guard`].
#[derive(Debug)]
pub struct Connection {
    target: String,
    channel: BalancedChannel,
}

impl Connection {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn policy(&self) -> Policy {
        self.channel.policy()
    }

    /// The resolved backend addresses, in resolution order.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.channel.addrs()
    }

    /// The backends currently ready to take calls.
    pub fn ready_addrs(&self) -> Vec<SocketAddr> {
        self.channel.ready_addrs()
    }

    /// Waits until `count` backends are ready or every backend has settled.
    /// Returns the number of ready backends.
    pub async fn settle(&self, count: usize) -> usize {
        self.channel.settle(count).await
    }

    /// A `Greeter` client sharing this connection's backends.
    pub fn client(&self) -> GreeterClient<BalancedChannel> {
        GreeterClient::new(self.channel.clone()).accept_compressed(CompressionEncoding::Gzip)
    }
}

impl Release for Connection {
    /// Stops the backend monitors and drops every backend connection, so
    /// clients obtained from this connection fail with `UNAVAILABLE`.
    fn release(&mut self) {
        tracing::info!("Closing connection to {}", self.target);
        self.channel.shutdown();
    }
}

/// Dials `target` with the load-balancing policy named in `service_config`.
///
/// # Errors
///
/// Returns [`Error::Connect`] if the payload is malformed or names no policy,
/// if the target cannot be resolved, or if an endpoint URI cannot be built.
///
/// Must be called from within a tokio runtime.
pub async fn connect(
    target: &str,
    service_config: &str,
    options: &ConnectOptions,
) -> Result<Connection> {
    let connect_error = |reason: String| Error::Connect {
        target: target.to_string(),
        reason,
    };

    let policy = ServiceConfig::from_json(service_config)
        .map_err(|e| connect_error(format!("invalid service config: {e}")))?
        .policy()
        .ok_or_else(|| connect_error("service config names no load-balancing policy".into()))?;

    let addrs = resolve(target).await?;

    let mut backends = Vec::with_capacity(addrs.len());
    for addr in addrs {
        let endpoint = Endpoint::from_shared(format!("http://{addr}"))
            .map_err(|e| connect_error(e.to_string()))?
            .connect_timeout(options.connect_timeout);
        backends.push(Backend { addr, endpoint });
    }

    tracing::info!(
        "Dialing {target} with {policy} over {} backend(s): {:?}",
        backends.len(),
        backends.iter().map(|b| b.addr).collect::<Vec<_>>()
    );

    let channel = BalancedChannel::new(backends, policy, options.backoff)
        .ok_or_else(|| connect_error("no addresses resolved".into()))?;
    Ok(Connection {
        target: target.to_string(),
        channel,
    })
}

/// Splits a target into its `host:port` entries.
///
/// Accepts `host:port`, `dns:///host:port`, and comma separated lists of
/// either.
pub fn parse_target(target: &str) -> Vec<&str> {
    target
        .split(',')
        .map(str::trim)
        .map(|entry| entry.strip_prefix(DNS_SCHEME).unwrap_or(entry))
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// Resolves every entry of `target` and returns the distinct socket addresses
/// in resolution order.
///
/// # Errors
///
/// Returns [`Error::Connect`] if an entry fails to resolve or nothing
/// resolves at all.
pub async fn resolve(target: &str) -> Result<Vec<SocketAddr>> {
    let entries = parse_target(target);
    if entries.is_empty() {
        return Err(Error::Connect {
            target: target.to_string(),
            reason: "empty target address".into(),
        });
    }

    let mut addrs: Vec<SocketAddr> = Vec::new();
    for entry in entries {
        let resolved = tokio::net::lookup_host(entry)
            .await
            .map_err(|e| Error::Connect {
                target: target.to_string(),
                reason: format!("resolving {entry}: {e}"),
            })?;
        for addr in resolved {
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
    }

    if addrs.is_empty() {
        return Err(Error::Connect {
            target: target.to_string(),
            reason: "no addresses resolved".into(),
        });
    }
    Ok(addrs)
}
