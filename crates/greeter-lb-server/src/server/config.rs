use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `greeter-server` binary.
///
/// All values are parsed from CLI arguments or environment variables. The bind
/// host and port together form the identity the server reports in every
/// greeting, so give each backend instance a distinct pair.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "greeter-server",
    version,
    about = "A gRPC greeter backend for client-side load balancing demos"
)]
pub struct CliArgs {
    /// Host or IP address to bind the gRPC listener to.
    ///
    /// Environment variable: `SERVER_HOST`
    #[arg(short = 's', long, env = "SERVER_HOST", default_value_t = String::from("0.0.0.0"))]
    pub server_host: String,

    /// Port for the gRPC listener.
    ///
    /// Environment variable: `SERVER_PORT`
    #[arg(short = 'p', long, env = "SERVER_PORT", default_value_t = 50051)]
    pub server_port: u16,

    /// Port for the Prometheus metrics endpoint. Omit to disable it.
    ///
    /// The endpoint binds to the same host as the gRPC listener.
    ///
    /// Environment variable: `METRICS_SERVER_PORT`
    #[arg(short = 'x', long, env = "METRICS_SERVER_PORT")]
    pub metrics_server_port: Option<u16>,

    /// Seconds to wait for in-flight calls after a shutdown signal.
    ///
    /// Environment variable: `DRAIN_TIMEOUT_SECS`
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value_t = 5)]
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port` the gRPC listener binds to; doubles as the server identity.
    pub server_addr: String,
    pub metrics_addr: Option<String>,
    pub drain_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let host = args.server_host.trim();
        if host.is_empty() {
            bail!("SERVER_HOST must not be empty");
        }

        if args.metrics_server_port == Some(args.server_port) && args.server_port != 0 {
            bail!(
                "METRICS_SERVER_PORT ({}) must differ from SERVER_PORT",
                args.server_port
            );
        }

        Ok(Self {
            server_addr: format!("{host}:{}", args.server_port),
            metrics_addr: args.metrics_server_port.map(|port| format!("{host}:{port}")),
            drain_timeout: Duration::from_secs(args.drain_timeout_secs),
        })
    }
}
