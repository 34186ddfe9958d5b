use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use purse_core::{AccountId, Amount, DomainError, EntryKind, TransactionId};

/// A balance holder.
///
/// `balance` is only ever changed by the ledger engine; `opening_balance` is what
/// the account was provisioned with and never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub opening_balance: Decimal,
    pub balance: Decimal,
}

impl Account {
    /// Compare the stored balance with a replay of `records` from the opening balance.
    pub fn audit(&self, records: &[TransactionRecord]) -> Result<AccountAudit, ReplayError> {
        let replayed = replay(self.id, self.opening_balance, records)?;
        Ok(AccountAudit {
            account_id: self.id,
            stored_balance: self.balance,
            consistent: replayed.balance == self.balance,
            replayed,
        })
    }
}

/// Lifecycle state of a log record.
///
/// Only effectful operations are logged, so there is a single state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Completed,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Completed => "COMPLETED",
        }
    }
}

impl core::str::FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(TransactionStatus::Completed),
            other => Err(DomainError::validation(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }
}

/// One applied balance change (immutable once written).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub kind: EntryKind,
    pub amount: Amount,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Signed effect of this record on the account balance.
    pub fn delta(&self) -> Decimal {
        self.kind.signed(self.amount)
    }
}

/// Result of folding an account's log over its opening balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerReplay {
    pub opening_balance: Decimal,
    pub total_credits: Decimal,
    pub total_debits: Decimal,
    pub balance: Decimal,
    pub record_count: usize,
}

/// Stored balance vs. replayed balance for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountAudit {
    pub account_id: AccountId,
    pub stored_balance: Decimal,
    pub replayed: LedgerReplay,
    pub consistent: bool,
}

/// A log that cannot have produced a valid balance history.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("record {record_id} belongs to account {found}, not {expected}")]
    ForeignRecord {
        record_id: TransactionId,
        expected: AccountId,
        found: AccountId,
    },

    #[error("record {found} follows record {previous}; log must be in id order")]
    OutOfOrder {
        previous: TransactionId,
        found: TransactionId,
    },

    #[error("balance would be {balance} after record {record_id}")]
    NegativeBalance {
        record_id: TransactionId,
        balance: Decimal,
    },
}

/// Rebuild an account balance from its opening balance and its log.
///
/// `records` must be the account's records in ascending id order. Every
/// intermediate balance must be non-negative, since that is what the engine
/// guaranteed when the records were written.
pub fn replay(
    account_id: AccountId,
    opening_balance: Decimal,
    records: &[TransactionRecord],
) -> Result<LedgerReplay, ReplayError> {
    let mut total_credits = Decimal::ZERO;
    let mut total_debits = Decimal::ZERO;
    let mut balance = opening_balance;
    let mut previous: Option<TransactionId> = None;

    for record in records {
        if record.account_id != account_id {
            return Err(ReplayError::ForeignRecord {
                record_id: record.id,
                expected: account_id,
                found: record.account_id,
            });
        }
        if let Some(prev) = previous {
            if record.id <= prev {
                return Err(ReplayError::OutOfOrder {
                    previous: prev,
                    found: record.id,
                });
            }
        }
        previous = Some(record.id);

        match record.kind {
            EntryKind::Credit => total_credits += record.amount.value(),
            EntryKind::Debit => total_debits += record.amount.value(),
        }
        balance += record.delta();

        if balance < Decimal::ZERO {
            return Err(ReplayError::NegativeBalance {
                record_id: record.id,
                balance,
            });
        }
    }

    Ok(LedgerReplay {
        opening_balance,
        total_credits,
        total_debits,
        balance,
        record_count: records.len(),
    })
}
