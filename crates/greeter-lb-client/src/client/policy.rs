//! Load-balancing policies and the gRPC service-config payload that carries
//! them.
//!
//! The policy is chosen once on the command line and embedded in a standard
//! gRPC service config:
//!
//! ```json
//! {"loadBalancingConfig":[{"round_robin":{}}]}
//! ```
//!
//! [`connect`](crate::client::connect::connect) parses that payload back to
//! select the picker for the connection.

use clap::ValueEnum;
use core::fmt;
use serde::{Deserialize, Serialize};

/// How successive calls are spread over the resolved backend instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Policy {
    /// Rotate through every reachable instance.
    #[value(name = "round_robin")]
    RoundRobin,
    /// Stick to the first reachable instance until it fails.
    #[value(name = "pick_first")]
    PickFirst,
}

impl Policy {
    /// The policy name as it appears in a gRPC service config.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Policy::RoundRobin => "round_robin",
            Policy::PickFirst => "pick_first",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Empty per-policy settings object (`{}`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoSettings {}

/// One entry of `loadBalancingConfig`, keyed by policy name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadBalancingConfig {
    #[serde(rename = "round_robin")]
    RoundRobin(NoSettings),
    #[serde(rename = "pick_first")]
    PickFirst(NoSettings),
}

impl From<Policy> for LoadBalancingConfig {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::RoundRobin => LoadBalancingConfig::RoundRobin(NoSettings {}),
            Policy::PickFirst => LoadBalancingConfig::PickFirst(NoSettings {}),
        }
    }
}

impl From<&LoadBalancingConfig> for Policy {
    fn from(config: &LoadBalancingConfig) -> Self {
        match config {
            LoadBalancingConfig::RoundRobin(_) => Policy::RoundRobin,
            LoadBalancingConfig::PickFirst(_) => Policy::PickFirst,
        }
    }
}

/// The subset of the gRPC service config this client understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub load_balancing_config: Vec<LoadBalancingConfig>,
}

impl ServiceConfig {
    pub fn new(policy: Policy) -> Self {
        Self {
            load_balancing_config: vec![policy.into()],
        }
    }

    /// Serializes the config to its JSON payload.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a JSON payload.
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    /// The first listed policy, which is the one gRPC applies.
    pub fn policy(&self) -> Option<Policy> {
        self.load_balancing_config.first().map(Policy::from)
    }
}
