#![doc = include_str!("../README.md")]

pub mod client;

pub use client::{
    connect::{ConnectOptions, Connection, connect},
    dispatch::{DispatchOptions, Greet, dispatch},
    policy::{Policy, ServiceConfig},
};
