//! Prometheus exposition for a single greeter backend.
//!
//! The endpoint runs on its own explicitly bound listener and router, and the
//! counter lives in a per-server `prometheus` registry rather than the
//! process-wide default one. Only one counter is exported:
//!
//! ```text
//! # HELP greeter_requests_total Total SayHello calls answered by this server.
//! # TYPE greeter_requests_total counter
//! greeter_requests_total{server="127.0.0.1:50051"} 42
//! ```

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use core::fmt;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TEXT_FORMAT, TextEncoder};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Counters updated by the gRPC handler and read by the exposition endpoint.
///
/// Each instance owns its own [`Registry`], so several servers in one process
/// (as in the tests) never collide on metric names.
pub struct Metrics {
    registry: Registry,
    requests: IntCounter,
}

impl Metrics {
    /// Registers a zeroed request counter labelled with the server identity.
    ///
    /// # Errors
    ///
    /// Returns the registry error if the counter cannot be created or
    /// registered.
    pub fn new(server: impl Into<String>) -> prometheus::Result<Self> {
        let server = server.into();
        let registry = Registry::new();
        let requests = IntCounterVec::new(
            Opts::new(
                "greeter_requests_total",
                "Total SayHello calls answered by this server.",
            ),
            &["server"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        Ok(Self {
            registry,
            requests: requests.with_label_values(&[server.as_str()]),
        })
    }

    pub fn record_request(&self) {
        self.requests.inc();
    }

    pub fn requests(&self) -> u64 {
        self.requests.get()
    }

    /// Encodes every registered metric in the Prometheus text format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("requests", &self.requests())
            .finish_non_exhaustive()
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Builds the router serving `GET /metrics`.
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Serves the metrics endpoint on `listener` until `stop` is cancelled.
///
/// # Errors
///
/// Returns the I/O error that terminated the accept loop.
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: Arc<Metrics>,
    stop: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Metrics endpoint listening on http://{addr}/metrics");
    }
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn exposes_counter_with_server_label() {
        let metrics = Metrics::new("127.0.0.1:50051").unwrap();
        metrics.record_request();
        metrics.record_request();

        let body = metrics.encode().unwrap();
        assert!(body.contains("# TYPE greeter_requests_total counter"));
        assert!(body.contains("greeter_requests_total{server=\"127.0.0.1:50051\"} 2\n"));
        assert_eq!(metrics.requests(), 2);
    }

    #[test]
    fn unused_counter_is_exported_as_zero() {
        let metrics = Metrics::new("idle:1").unwrap();
        assert!(
            metrics
                .encode()
                .unwrap()
                .contains("greeter_requests_total{server=\"idle:1\"} 0")
        );
    }

    #[test]
    fn instances_do_not_share_a_registry() {
        let one = Metrics::new("a:1").unwrap();
        let two = Metrics::new("b:2").unwrap();
        one.record_request();
        assert_eq!(two.requests(), 0);
        assert!(!two.encode().unwrap().contains("a:1"));
    }

    #[tokio::test]
    async fn route_serves_text_exposition() {
        let metrics = Arc::new(Metrics::new("h:1").unwrap());
        metrics.record_request();

        let response = router(Arc::clone(&metrics))
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            TEXT_FORMAT
        );
    }
}
