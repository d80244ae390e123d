//! The greeter serving loop.
//!
//! - [`config`] - CLI/environment configuration.
//! - [`service`] - the `Greeter` gRPC implementation.
//! - [`metrics`] - the `/metrics` exposition endpoint.

pub mod config;
pub mod metrics;
pub mod service;

use greeter_lb_core::{
    Error, Result,
    proto::{FILE_DESCRIPTOR_SET, greeter_server::GreeterServer},
};
use service::handler::GreeterService;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic_reflection::server::Builder;

/// Serves `service` on `listener` until `stop` is cancelled.
///
/// The standard gRPC health service is registered next to the greeter and
/// reports `SERVING` until a stop is requested. Server reflection exposes the
/// `helloservice` schema to tools such as `grpcurl`. On stop, the server stops
/// accepting, drains in-flight calls, and drops the listening socket before
/// returning.
///
/// # Errors
///
/// Returns [`Error::Reflection`] if the reflection service cannot be built
/// and [`Error::Serve`] if the transport fails while serving.
pub async fn serve(
    listener: TcpListener,
    service: GreeterService,
    stop: CancellationToken,
) -> Result<()> {
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<GreeterServer<GreeterService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .map_err(|e| Error::Reflection(Box::new(e)))?;

    let shutdown = async move {
        stop.cancelled().await;
        health_reporter
            .set_not_serving::<GreeterServer<GreeterService>>()
            .await;
        tracing::info!("Stopping gRPC server, draining in-flight calls");
    };

    Server::builder()
        .add_service(health_service)
        .add_service(reflection)
        .add_service(service.into_server())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
        .map_err(Error::Serve)?;

    tracing::info!("gRPC server stopped");
    Ok(())
}
