use crate::client::{connect::ConnectOptions, dispatch::DispatchOptions, policy::Policy};
use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Command-line options for the `greeter-client` binary.
///
/// The target address itself is not a flag: it comes from
/// `SERVICE_TARGET_ADDRESS` through [`greeter_lb_core::config::Config`].
#[derive(Parser, Debug, Clone)]
#[command(
    name = "greeter-client",
    version,
    about = "Calls the greeter service with client-side load balancing"
)]
pub struct CliArgs {
    /// Load-balancing policy applied across the resolved instances.
    #[arg(short = 'l', long, value_enum, default_value_t = Policy::PickFirst)]
    pub load_balancing_policy: Policy,

    /// Name sent in every request.
    #[arg(short = 'n', long, default_value_t = String::from("world"))]
    pub name: String,

    /// Number of calls to make. Omit to call until interrupted.
    #[arg(short = 'c', long)]
    pub count: Option<u64>,

    /// Per-call deadline in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub deadline_ms: u64,

    /// Pause between calls in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub pause_ms: u64,

    /// Delay before an unreachable or failed instance is dialed again, in
    /// milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub backoff_ms: u64,

    /// Upper bound for connecting to one instance, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub connect_timeout_ms: u64,

    /// Seconds to let an in-flight call finish after a shutdown signal.
    #[arg(long, default_value_t = 5)]
    pub drain_timeout_secs: u64,

    /// Dotenv file to load before reading the environment. Defaults to an
    /// optional `.env` in the working directory.
    #[arg(long)]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub policy: Policy,
    pub dispatch: DispatchOptions,
    pub connect: ConnectOptions,
    pub drain_timeout: Duration,
    pub env_file: Option<PathBuf>,
}

impl TryFrom<CliArgs> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.deadline_ms == 0 {
            bail!("--deadline-ms must be greater than zero");
        }
        if args.connect_timeout_ms == 0 {
            bail!("--connect-timeout-ms must be greater than zero");
        }

        Ok(Self {
            policy: args.load_balancing_policy,
            dispatch: DispatchOptions {
                name: args.name,
                count: args.count,
                deadline: Duration::from_millis(args.deadline_ms),
                pause: Duration::from_millis(args.pause_ms),
            },
            connect: ConnectOptions {
                connect_timeout: Duration::from_millis(args.connect_timeout_ms),
                backoff: Duration::from_millis(args.backoff_ms),
            },
            drain_timeout: Duration::from_secs(args.drain_timeout_secs),
            env_file: args.env_file,
        })
    }
}
