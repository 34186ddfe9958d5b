//! `purse-core` — domain building blocks shared by every crate.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod kind;
pub mod money;

pub use error::{DomainError, DomainResult};
pub use id::{AccountId, TransactionId};
pub use kind::EntryKind;
pub use money::Amount;

/// Re-exported so downstream crates agree on one decimal type.
pub use rust_decimal::Decimal;
