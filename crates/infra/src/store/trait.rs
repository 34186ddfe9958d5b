use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;

use purse_accounting::{Account, TransactionRecord};
use purse_core::{AccountId, Amount, EntryKind};

/// Ledger store operation error.
///
/// These are the conditions a store reports to the engine. Three of them are
/// business outcomes the store is responsible for detecting (`AccountNotFound`,
/// `InsufficientBalance`, `BalanceLimitExceeded`); the rest are infrastructure
/// failures.
///
/// ## Error Categories
///
/// - **AccountNotFound**: no account row for the id
/// - **InsufficientBalance**: the adjustment would take the balance below zero
/// - **BalanceLimitExceeded**: the adjustment would reach [`Amount::limit`]
/// - **InvalidAccount**: provisioning data rejected (e.g. negative opening balance)
/// - **Unavailable**: the durable medium failed (connection, pool, io, decoding)
/// - **Conflict**: the store aborted the unit of work because of a concurrent one
///   (serialization failure, deadlock)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("insufficient balance on account {account_id} for delta {delta}")]
    InsufficientBalance { account_id: AccountId, delta: Decimal },

    #[error("balance limit exceeded on account {account_id} for delta {delta}")]
    BalanceLimitExceeded { account_id: AccountId, delta: Decimal },

    #[error("invalid account: {0}")]
    InvalidAccount(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("concurrent transaction conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Whether retrying the whole unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict(_))
    }
}

/// Balance mutation half of a unit of work.
#[async_trait::async_trait]
pub trait AccountStore: Send {
    /// Apply `delta` to the account's balance and return the new balance.
    ///
    /// Implementations must:
    /// - refuse (with `InsufficientBalance`, no state change) when
    ///   `balance + delta < 0`
    /// - refuse (with `BalanceLimitExceeded`, no state change) when
    ///   `balance + delta >= Amount::limit()`
    /// - serialize concurrent adjustments of the same account so that two units
    ///   of work can never both succeed when their combined effect is negative
    /// - leave other accounts free to proceed in parallel
    async fn adjust_balance(
        &mut self,
        account_id: AccountId,
        delta: Decimal,
    ) -> Result<Decimal, StoreError>;
}

/// Append-only log half of a unit of work.
#[async_trait::async_trait]
pub trait TransactionLog: Send {
    /// Append one `COMPLETED` record. It becomes visible only if the enclosing
    /// unit of work commits.
    async fn append(
        &mut self,
        account_id: AccountId,
        kind: EntryKind,
        amount: Amount,
    ) -> Result<TransactionRecord, StoreError>;
}

/// A scoped, atomic unit of work over accounts and the transaction log.
///
/// Dropping a unit of work without calling `commit` rolls it back: staged balance
/// changes and appended records are discarded and any account locks are released.
/// This holds on every exit path, including early returns, panics and
/// cancellation of the owning future.
#[async_trait::async_trait]
pub trait UnitOfWork: AccountStore + TransactionLog + Sized {
    /// Make every change of this unit of work durable, or none of them.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard every change of this unit of work.
    async fn rollback(self) -> Result<(), StoreError>;
}

/// Durable account + transaction log store.
///
/// ## Implementation Requirements
///
/// - `begin()` returns an isolated unit of work (see [`UnitOfWork`])
/// - reads only observe committed state
/// - `transactions()` returns records in ascending id order
/// - ids are assigned monotonically by the store (gaps allowed on rollback)
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    type UnitOfWork: UnitOfWork + 'static;

    /// Open a new unit of work.
    async fn begin(&self) -> Result<Self::UnitOfWork, StoreError>;

    /// Provision an account (administrative; not part of the engine contract).
    async fn open_account(
        &self,
        name: &str,
        opening_balance: Decimal,
    ) -> Result<Account, StoreError>;

    /// Load one account's committed state.
    async fn account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Load every account, ordered by id.
    async fn accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Load an account's committed log. Unknown accounts are `AccountNotFound`.
    async fn transactions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<TransactionRecord>, StoreError>;
}

#[async_trait::async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    type UnitOfWork = S::UnitOfWork;

    async fn begin(&self) -> Result<Self::UnitOfWork, StoreError> {
        (**self).begin().await
    }

    async fn open_account(
        &self,
        name: &str,
        opening_balance: Decimal,
    ) -> Result<Account, StoreError> {
        (**self).open_account(name, opening_balance).await
    }

    async fn account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        (**self).account(account_id).await
    }

    async fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        (**self).accounts().await
    }

    async fn transactions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        (**self).transactions(account_id).await
    }
}

/// Shared provisioning checks for `open_account` implementations.
pub(crate) fn validate_new_account(name: &str, opening_balance: Decimal) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::InvalidAccount("name must not be empty".to_string()));
    }
    if name.chars().count() > 100 {
        return Err(StoreError::InvalidAccount(
            "name must be at most 100 characters".to_string(),
        ));
    }
    if opening_balance < Decimal::ZERO {
        return Err(StoreError::InvalidAccount(
            "opening balance must not be negative".to_string(),
        ));
    }
    if opening_balance >= Amount::limit() {
        return Err(StoreError::InvalidAccount(
            "opening balance is too large".to_string(),
        ));
    }
    if opening_balance.normalize().scale() > Amount::SCALE {
        return Err(StoreError::InvalidAccount(format!(
            "opening balance must have at most {} decimal places",
            Amount::SCALE
        )));
    }
    Ok(())
}
