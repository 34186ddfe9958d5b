//! Store and engine configuration read from the environment.
//!
//! Every `from_lookup` constructor takes the variable source as a function so
//! callers (and tests) can supply values without touching the process
//! environment; `from_env` is the `std::env::var` shorthand.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineConfig;

pub const STORE_VAR: &str = "PURSE_STORE";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const MAX_CONNECTIONS_VAR: &str = "PURSE_DB_MAX_CONNECTIONS";
pub const ACQUIRE_TIMEOUT_VAR: &str = "PURSE_DB_ACQUIRE_TIMEOUT_MS";
pub const APPLY_TIMEOUT_VAR: &str = "PURSE_APPLY_TIMEOUT_MS";

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var} must be set")]
    Missing { var: &'static str },

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Which [`LedgerStore`](crate::store::LedgerStore) implementation to run on.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "inmemory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            other => Err(format!("expected 'memory' or 'postgres', got '{other}'")),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

// Connection strings carry credentials.
impl core::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("database_url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Postgres(PostgresConfig),
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend: StoreBackend = parse_or(&lookup, STORE_VAR, StoreBackend::default())?;

        match backend {
            StoreBackend::Memory => Ok(StoreConfig::Memory),
            StoreBackend::Postgres => {
                let database_url = lookup(DATABASE_URL_VAR)
                    .filter(|url| !url.trim().is_empty())
                    .ok_or(ConfigError::Missing {
                        var: DATABASE_URL_VAR,
                    })?;
                let max_connections =
                    parse_or(&lookup, MAX_CONNECTIONS_VAR, DEFAULT_MAX_CONNECTIONS)?;
                if max_connections == 0 {
                    return Err(ConfigError::Invalid {
                        var: MAX_CONNECTIONS_VAR,
                        value: "0".to_string(),
                        reason: "must be at least 1".to_string(),
                    });
                }
                let acquire_timeout_ms =
                    parse_or(&lookup, ACQUIRE_TIMEOUT_VAR, DEFAULT_ACQUIRE_TIMEOUT_MS)?;

                Ok(StoreConfig::Postgres(PostgresConfig {
                    database_url,
                    max_connections,
                    acquire_timeout: Duration::from_millis(acquire_timeout_ms),
                }))
            }
        }
    }

    pub fn backend(&self) -> StoreBackend {
        match self {
            StoreConfig::Memory => StoreBackend::Memory,
            StoreConfig::Postgres(_) => StoreBackend::Postgres,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let apply_timeout = parse_opt::<u64>(&lookup, APPLY_TIMEOUT_VAR)?
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        Ok(EngineConfig { apply_timeout })
    }
}

/// Parse `var` if it is set to a non-blank value.
pub fn parse_opt<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        _ => Ok(None),
    }
}

/// Parse `var`, falling back to `default` when it is unset or blank.
pub fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    Ok(parse_opt(lookup, var)?.unwrap_or(default))
}
