//! Accounting module (account balances + append-only transaction log).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod ledger;

pub use ledger::{
    replay, Account, AccountAudit, LedgerReplay, ReplayError, TransactionRecord,
    TransactionStatus,
};
