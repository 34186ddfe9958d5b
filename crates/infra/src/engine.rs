//! Ledger transaction engine.
//!
//! Every balance change goes through [`LedgerEngine::apply`], which runs one unit
//! of work against the injected store:
//!
//! ```text
//! apply(account, kind, amount)
//!   ↓
//! 1. begin unit of work
//!   ↓
//! 2. adjust balance by kind.signed(amount)   (refused if it would go negative
//!                                            or reach Amount::limit())
//!   ↓
//! 3. append COMPLETED record
//!   ↓
//! 4. commit
//! ```
//!
//! An operation is either applied in full (new balance and log record both
//! committed) or rejected with no state change. Any exit before `commit`, including
//! a dropped future, rolls the unit of work back. The engine never retries; callers
//! decide based on [`LedgerError::is_retryable`].

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use purse_accounting::{Account, AccountAudit, ReplayError, TransactionRecord};
use purse_core::{AccountId, Amount, DomainError, EntryKind};

use crate::store::{AccountStore, LedgerStore, StoreError, TransactionLog, UnitOfWork};

/// Re-reads allowed while an audited account keeps changing underneath.
const AUDIT_SNAPSHOT_ATTEMPTS: usize = 5;

/// Engine tuning knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on one `apply`. Elapsing drops the in-flight unit of work.
    pub apply_timeout: Option<Duration>,
}

/// A committed balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Applied {
    pub record: TransactionRecord,
    /// Account balance right after this change.
    pub balance: Decimal,
}

/// Coarse classification of a [`LedgerError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request itself is malformed.
    Validation,
    /// The request is well-formed but the ledger refuses it.
    BusinessRule,
    /// Infrastructure failed; the same request may succeed later.
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("account {account_id} not found")]
    AccountNotFound { account_id: AccountId },

    #[error("insufficient balance")]
    InsufficientBalance {
        account_id: AccountId,
        kind: EntryKind,
        amount: Amount,
    },

    #[error("balance limit exceeded")]
    BalanceLimitExceeded {
        account_id: AccountId,
        kind: EntryKind,
        amount: Amount,
    },

    #[error("store unavailable: {reason}")]
    StoreUnavailable {
        account_id: Option<AccountId>,
        reason: String,
    },

    #[error("concurrent transaction conflict: {reason}")]
    Conflict {
        account_id: Option<AccountId>,
        reason: String,
    },
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::Validation(_) => ErrorCategory::Validation,
            LedgerError::AccountNotFound { .. }
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::BalanceLimitExceeded { .. } => ErrorCategory::BusinessRule,
            LedgerError::StoreUnavailable { .. } | LedgerError::Conflict { .. } => {
                ErrorCategory::Transient
            }
        }
    }

    /// Map a store failure outside of a balance adjustment.
    fn from_store(account_id: Option<AccountId>, err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(id) => LedgerError::AccountNotFound { account_id: id },
            StoreError::InvalidAccount(msg) => LedgerError::Validation(msg),
            StoreError::Unavailable(reason) => LedgerError::StoreUnavailable { account_id, reason },
            StoreError::Conflict(reason) => LedgerError::Conflict { account_id, reason },
            StoreError::InsufficientBalance { account_id, delta } => LedgerError::StoreUnavailable {
                account_id: Some(account_id),
                reason: format!("unexpected overdraft refusal for delta {delta}"),
            },
            StoreError::BalanceLimitExceeded { account_id, delta } => LedgerError::StoreUnavailable {
                account_id: Some(account_id),
                reason: format!("unexpected balance limit refusal for delta {delta}"),
            },
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                LedgerError::Validation(msg)
            }
        }
    }
}

/// Failure of [`LedgerEngine::verify_account`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("transaction log cannot be replayed: {0}")]
    Replay(#[from] ReplayError),
}

/// Applies credits and debits against a [`LedgerStore`].
///
/// The engine holds no mutable state of its own; clone it freely (with a
/// cheaply clonable store) to share it across tasks.
#[derive(Debug, Clone)]
pub struct LedgerEngine<S> {
    store: S,
    config: EngineConfig,
}

impl<S> LedgerEngine<S>
where
    S: LedgerStore,
{
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub async fn credit(&self, account_id: AccountId, amount: Amount) -> Result<Applied, LedgerError> {
        self.apply(account_id, EntryKind::Credit, amount).await
    }

    pub async fn debit(&self, account_id: AccountId, amount: Amount) -> Result<Applied, LedgerError> {
        self.apply(account_id, EntryKind::Debit, amount).await
    }

    /// Like [`apply`](Self::apply), for amounts that have not been validated yet.
    pub async fn apply_decimal(
        &self,
        account_id: AccountId,
        kind: EntryKind,
        amount: Decimal,
    ) -> Result<Applied, LedgerError> {
        let amount = Amount::new(amount)?;
        self.apply(account_id, kind, amount).await
    }

    /// Apply one balance change atomically.
    #[instrument(
        name = "ledger.apply",
        skip_all,
        fields(account_id = %account_id, kind = %kind, amount = %amount)
    )]
    pub async fn apply(
        &self,
        account_id: AccountId,
        kind: EntryKind,
        amount: Amount,
    ) -> Result<Applied, LedgerError> {
        let result = match self.config.apply_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.apply_once(account_id, kind, amount)).await {
                    Ok(result) => result,
                    Err(_) => Err(LedgerError::StoreUnavailable {
                        account_id: Some(account_id),
                        reason: format!("timed out after {}ms", limit.as_millis()),
                    }),
                }
            }
            None => self.apply_once(account_id, kind, amount).await,
        };

        match &result {
            Ok(applied) => tracing::info!(
                transaction_id = %applied.record.id,
                balance = %applied.balance,
                "transaction applied"
            ),
            Err(err) if err.is_retryable() => {
                tracing::warn!(error = %err, "transaction failed")
            }
            Err(err) => tracing::info!(error = %err, "transaction rejected"),
        }

        result
    }

    async fn apply_once(
        &self,
        account_id: AccountId,
        kind: EntryKind,
        amount: Amount,
    ) -> Result<Applied, LedgerError> {
        let reject = |err: StoreError| match err {
            StoreError::InsufficientBalance { .. } => LedgerError::InsufficientBalance {
                account_id,
                kind,
                amount,
            },
            StoreError::BalanceLimitExceeded { .. } => LedgerError::BalanceLimitExceeded {
                account_id,
                kind,
                amount,
            },
            other => LedgerError::from_store(Some(account_id), other),
        };

        let mut uow = self.store.begin().await.map_err(reject)?;

        let balance = match uow.adjust_balance(account_id, kind.signed(amount)).await {
            Ok(balance) => balance,
            Err(err) => {
                let err = reject(err);
                if !err.is_retryable() {
                    if let Err(rollback_err) = uow.rollback().await {
                        tracing::warn!(error = %rollback_err, "rollback after rejection failed");
                    }
                }
                return Err(err);
            }
        };

        // From here on, any early return drops `uow`, which rolls it back.
        let record = uow.append(account_id, kind, amount).await.map_err(reject)?;
        uow.commit().await.map_err(reject)?;

        Ok(Applied { record, balance })
    }

    pub async fn account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.store
            .account(account_id)
            .await
            .map_err(|e| LedgerError::from_store(Some(account_id), e))?
            .ok_or(LedgerError::AccountNotFound { account_id })
    }

    pub async fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        self.store
            .accounts()
            .await
            .map_err(|e| LedgerError::from_store(None, e))
    }

    /// The account's committed log, oldest first.
    pub async fn transactions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        self.store
            .transactions(account_id)
            .await
            .map_err(|e| LedgerError::from_store(Some(account_id), e))
    }

    /// Replay the account's log from its opening balance and compare the result
    /// with the stored balance.
    ///
    /// The log is read on both sides of the account read; if a commit lands in
    /// between, the snapshot is retaken.
    #[instrument(skip_all, fields(account_id = %account_id))]
    pub async fn verify_account(&self, account_id: AccountId) -> Result<AccountAudit, AuditError> {
        for _ in 0..AUDIT_SNAPSHOT_ATTEMPTS {
            let before = self.transactions(account_id).await?;
            let account = self.account(account_id).await?;
            let after = self.transactions(account_id).await?;

            if before.last().map(|r| r.id) != after.last().map(|r| r.id) {
                tracing::debug!("log changed during audit, retaking snapshot");
                continue;
            }

            let audit = account.audit(&after)?;
            if !audit.consistent {
                tracing::error!(
                    stored = %audit.stored_balance,
                    replayed = %audit.replayed.balance,
                    "stored balance does not match transaction log"
                );
            }
            return Ok(audit);
        }

        Err(LedgerError::Conflict {
            account_id: Some(account_id),
            reason: "transaction log kept changing during audit".to_string(),
        }
        .into())
    }
}
