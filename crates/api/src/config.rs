//! Process configuration for the API binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use purse_infra::EngineConfig;
use purse_infra::config::{parse_or, ConfigError, StoreConfig};
use purse_observability::LogFormat;

pub const BIND_ADDR_VAR: &str = "PURSE_BIND_ADDR";
pub const RESET_DATABASE_VAR: &str = "PURSE_RESET_DATABASE";
pub const LOG_FORMAT_VAR: &str = "PURSE_LOG_FORMAT";

const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9090);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub store: StoreConfig,
    pub engine: EngineConfig,
    /// Drop, recreate and reseed the database on startup (Postgres only).
    pub reset_database: bool,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: parse_or(&lookup, BIND_ADDR_VAR, DEFAULT_BIND_ADDR)?,
            store: StoreConfig::from_lookup(&lookup)?,
            engine: EngineConfig::from_lookup(&lookup)?,
            reset_database: parse_or(&lookup, RESET_DATABASE_VAR, false)?,
            log_format: parse_or(&lookup, LOG_FORMAT_VAR, LogFormat::default())?,
        })
    }
}
