//! The load-balancing greeter client.
//!
//! - [`policy`] - policy names and the service-config payload.
//! - [`balance`] - the per-call backend picker behind [`balance::BalancedChannel`].
//! - [`connect`] - resolving a target and building a [`connect::Connection`].
//! - [`dispatch`] - the sequential `SayHello` loop.
//! - [`config`] - command-line options for the `greeter-client` binary.

pub mod balance;
pub mod config;
pub mod connect;
pub mod dispatch;
pub mod policy;
