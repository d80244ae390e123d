//! Console logging for the greeter binaries.
//!
//! Both processes log through `tracing`. [`init_telemetry`] installs a
//! `tracing_subscriber` registry filtered by `RUST_LOG` (default `info`) that
//! prints one line per event with a local RFC 3339 timestamp, the thread id,
//! and the source location.

use crate::Result;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`crate::Error::Telemetry`] if a global subscriber is already set.
pub fn init_telemetry() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        )
        .try_init()?;
    Ok(())
}
