//! Environment-backed settings shared by the greeter processes.
//!
//! Every key listed in [`Config`] is mandatory. The values are read once at
//! start-up, optionally after pre-populating the environment from a dotenv
//! file, and converted explicitly key by key.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Logical address of the greeter service the client dials.
pub const SERVICE_TARGET_ADDRESS: &str = "SERVICE_TARGET_ADDRESS";
/// Template consumed by the Prometheus scrape config generator.
pub const PROM_TEMPLATE_FILE: &str = "PROM_TEMPLATE_FILE";
/// Output path of the generated Prometheus scrape config.
pub const PROM_OUTPUT_FILE: &str = "PROM_OUTPUT_FILE";
/// Metrics port of the first greeter backend.
pub const PROM_TARGET_GRPC_SERVER_ONE_PORT: &str = "PROM_TARGET_GRPC_SERVER_ONE_PORT";
/// Metrics port of the second greeter backend.
pub const PROM_TARGET_GRPC_SERVER_TWO_PORT: &str = "PROM_TARGET_GRPC_SERVER_TWO_PORT";
/// Template consumed by the datasource config generator.
pub const DS_TEMPLATE_FILE: &str = "DS_TEMPLATE_FILE";
/// Output path of the generated datasource config.
pub const DS_OUTPUT_FILE: &str = "DS_OUTPUT_FILE";
/// Port of the Prometheus server referenced by the datasource config.
pub const DS_SERVER_PORT: &str = "DS_SERVER_PORT";

/// Every key [`Config::read`] requires, in the order they are checked.
pub const REQUIRED_KEYS: [&str; 8] = [
    SERVICE_TARGET_ADDRESS,
    PROM_TEMPLATE_FILE,
    PROM_OUTPUT_FILE,
    PROM_TARGET_GRPC_SERVER_ONE_PORT,
    PROM_TARGET_GRPC_SERVER_TWO_PORT,
    DS_TEMPLATE_FILE,
    DS_OUTPUT_FILE,
    DS_SERVER_PORT,
];

/// Typed view over the required environment settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub service_target_address: String,
    pub prom_template_file: PathBuf,
    pub prom_output_file: PathBuf,
    pub prom_target_grpc_server_one_port: u16,
    pub prom_target_grpc_server_two_port: u16,
    pub ds_template_file: PathBuf,
    pub ds_output_file: PathBuf,
    pub ds_server_port: u16,
}

impl Config {
    /// Loads `env_file` (or, when `None`, an optional `.env` in the working
    /// directory) into the process environment and then calls
    /// [`Config::read`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnvFile`] if an explicitly named file cannot be
    /// loaded, and any error [`Config::read`] returns.
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path).map_err(|source| Error::EnvFile {
                    path: path.display().to_string(),
                    source,
                })?;
            }
            None => {
                let _ = dotenvy::dotenv();
            }
        }
        Self::read()
    }

    /// Reads the settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingSetting`] naming the first absent key, or
    /// [`Error::InvalidSetting`] if a port is not a valid `u16`.
    pub fn read() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parses the settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            service_target_address: required(&lookup, SERVICE_TARGET_ADDRESS)?,
            prom_template_file: required(&lookup, PROM_TEMPLATE_FILE)?.into(),
            prom_output_file: required(&lookup, PROM_OUTPUT_FILE)?.into(),
            prom_target_grpc_server_one_port: port(&lookup, PROM_TARGET_GRPC_SERVER_ONE_PORT)?,
            prom_target_grpc_server_two_port: port(&lookup, PROM_TARGET_GRPC_SERVER_TWO_PORT)?,
            ds_template_file: required(&lookup, DS_TEMPLATE_FILE)?.into(),
            ds_output_file: required(&lookup, DS_OUTPUT_FILE)?.into(),
            ds_server_port: port(&lookup, DS_SERVER_PORT)?,
        })
    }
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::MissingSetting { key }),
    }
}

fn port<F>(lookup: &F, key: &'static str) -> Result<u16>
where
    F: Fn(&str) -> Option<String>,
{
    let value = required(lookup, key)?;
    value
        .trim()
        .parse::<u16>()
        .map_err(|e| Error::InvalidSetting {
            key,
            value,
            reason: e.to_string(),
        })
}
