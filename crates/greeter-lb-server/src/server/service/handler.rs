//! gRPC service implementation for the greeter backend.
//!
//! [`GreeterService`] answers every `SayHello` with a greeting that embeds the
//! server's own bind string, which is what lets a load-balancing client see
//! which instance served a given call. The service is stateless across calls;
//! the only shared state is the request counter exposed on `/metrics`.

use crate::server::metrics::Metrics;
use greeter_lb_core::proto::{
    HelloRequest, HelloResponse,
    greeter_server::{Greeter, GreeterServer},
};
use std::sync::Arc;
use tonic::{Request, Response, Status, codec::CompressionEncoding};

/// Formats the response message for `name` as served by `host`.
pub fn greeting(name: &str, host: &str) -> String {
    format!("Hello, {name} (from server {host})")
}

/// The `helloservice.Greeter` implementation.
#[derive(Debug, Clone)]
pub struct GreeterService {
    host: Arc<str>,
    metrics: Arc<Metrics>,
}

impl GreeterService {
    /// Creates a service identifying itself as `host`.
    pub fn new(host: impl Into<Arc<str>>, metrics: Arc<Metrics>) -> Self {
        Self {
            host: host.into(),
            metrics,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Wraps the service in the generated tonic server with gzip enabled in
    /// both directions.
    pub fn into_server(self) -> GreeterServer<Self> {
        GreeterServer::new(self)
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip)
    }
}

#[tonic::async_trait]
impl Greeter for GreeterService {
    #[tracing::instrument(skip_all, fields(name = %req.get_ref().name))]
    async fn say_hello(
        &self,
        req: Request<HelloRequest>,
    ) -> Result<Response<HelloResponse>, Status> {
        self.metrics.record_request();
        let message = greeting(&req.get_ref().name, &self.host);
        tracing::debug!("Answering: {message}");
        Ok(Response::new(HelloResponse { message }))
    }
}
