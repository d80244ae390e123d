//! Definitions shared by the client and server binaries.
//!
//! - [`error`] - Unified error type and `Result` alias.
//! - [`proto`] - `helloservice` messages and the generated `Greeter` stubs.

pub mod error;
pub mod proto;

pub use error::{Error, Result};
