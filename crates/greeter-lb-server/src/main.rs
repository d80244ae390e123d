use anyhow::Context;
use clap::Parser;
use greeter_lb_core::{
    Error,
    shutdown::{Coordinator, Outcome, Signal, Signals},
    telemetry::init_telemetry,
};
use greeter_lb_server::server::{
    config::{CliArgs, ServerConfig},
    metrics::{Metrics, serve_metrics},
    serve,
    service::handler::GreeterService,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry()?;

    let res = run(config).await;
    tracing::info!("main: Completed");
    res
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let listener = bind(&config.server_addr).await?;
    let metrics = Arc::new(
        Metrics::new(config.server_addr.clone()).context("registering metrics")?,
    );

    let metrics_stop = CancellationToken::new();
    if let Some(addr) = &config.metrics_addr {
        let metrics_listener = bind(addr).await?;
        let metrics = Arc::clone(&metrics);
        let stop = metrics_stop.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(metrics_listener, metrics, stop).await {
                tracing::error!("Metrics endpoint failed: {e}");
            }
        });
    }

    let signals = Signals::install()?;
    let service = GreeterService::new(config.server_addr.as_str(), metrics);
    tracing::info!("gRPC server listening on {}", config.server_addr);

    let outcome = Coordinator::new(config.drain_timeout)
        .run(
            move |stop| serve(listener, service, stop),
            wait_for_signal(signals),
        )
        .await;
    metrics_stop.cancel();

    match outcome {
        Outcome::Completed | Outcome::Signalled(_) => Ok(()),
        Outcome::Failed(e) => Err(anyhow::Error::new(e).context("server error")),
        Outcome::Panicked(e) => Err(anyhow::Error::new(e).context("server error")),
    }
}

async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Listen {
            addr: addr.to_string(),
            source,
        })
        .context("starting server")
}

async fn wait_for_signal(mut signals: Signals) -> Signal {
    signals.recv().await
}
