#![doc = include_str!("../README.md")]

pub mod server;

pub use server::serve;
pub use server::service::handler::{GreeterService, greeting};
