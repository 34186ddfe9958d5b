//! Ledger store boundary.
//!
//! A store owns two things that must change together: account balances and the
//! append-only transaction log. Both are only mutated through a [`UnitOfWork`],
//! which either commits every change or none.

pub mod in_memory;
pub mod postgres;
pub mod schema;
pub mod r#trait;

pub use in_memory::{InMemoryLedgerStore, InMemoryUnitOfWork};
pub use postgres::{PostgresLedgerStore, PostgresUnitOfWork};
pub use r#trait::{AccountStore, LedgerStore, StoreError, TransactionLog, UnitOfWork};
pub use schema::{SeedAccount, default_seed, seed_accounts};
