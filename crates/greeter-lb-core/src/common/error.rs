//! Error types for the greeter client and server.
//!
//! This module defines the central `Error` enum shared by both binaries. Every
//! variant names the operation that failed so the chain printed at the process
//! entry point reads as a short trace of what went wrong.
//!
//! ## Error Cases
//! - `MissingSetting` / `InvalidSetting` / `EnvFile`: configuration could not
//!   be read. Fatal, start-up only.
//! - `Connect`: the client could not begin dialing the target. Fatal, start-up
//!   only.
//! - `Listen`: a listening socket could not be bound. Fatal, start-up only.
//! - `Call`: a single `SayHello` call failed. Terminates the dispatch loop.
//! - `Reflection` / `Serve`: the serving loop could not be assembled or
//!   failed while running.
//! - `Signals` / `Telemetry`: process plumbing could not be installed.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the greeter processes.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A required configuration key was absent or empty.
    #[error("missing required setting `{key}`")]
    MissingSetting { key: &'static str },

    /// A configuration key was present but could not be converted.
    #[error("invalid value {value:?} for setting `{key}`: {reason}")]
    InvalidSetting {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// An explicitly requested dotenv file could not be loaded.
    #[error("loading env vars from {path}")]
    EnvFile {
        path: String,
        #[source]
        source: dotenvy::Error,
    },

    /// The connection to the target could not be set up.
    #[error("dialing {target}: {reason}")]
    Connect { target: String, reason: String },

    /// Binding a listening socket failed.
    #[error("tcp listening on {addr}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A remote call failed or exceeded its deadline.
    #[error("calling SayHello")]
    Call {
        #[source]
        status: Status,
    },

    /// The gRPC reflection service could not be built from the embedded
    /// descriptor set.
    #[error("building reflection service")]
    Reflection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The gRPC serving loop terminated with an error.
    #[error("serving gRPC")]
    Serve(#[source] tonic::transport::Error),

    /// Termination signal handlers could not be installed.
    #[error("installing signal handlers")]
    Signals(#[source] std::io::Error),

    /// The global tracing subscriber could not be installed.
    #[error("initializing telemetry")]
    Telemetry(#[from] tracing_subscriber::util::TryInitError),
}

impl Error {
    /// Returns the gRPC status carried by a [`Error::Call`], if any.
    pub fn status(&self) -> Option<&Status> {
        match self {
            Error::Call { status } => Some(status),
            _ => None,
        }
    }
}
