//! Infrastructure layer: ledger stores, the transaction engine, configuration.

pub mod config;
pub mod engine;
pub mod store;

pub use engine::{Applied, AuditError, EngineConfig, ErrorCategory, LedgerEngine, LedgerError};
