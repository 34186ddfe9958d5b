//! Direction of a balance change.

use core::str::FromStr;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::money::Amount;

/// Whether an entry adds to (`Credit`, a top-up) or takes from (`Debit`, a
/// withdrawal) an account balance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    Credit,
    Debit,
}

impl EntryKind {
    /// Stable wire/storage representation (`CREDIT` / `DEBIT`).
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Credit => "CREDIT",
            EntryKind::Debit => "DEBIT",
        }
    }

    /// Balance delta produced by applying `amount` in this direction.
    pub fn signed(self, amount: Amount) -> Decimal {
        match self {
            EntryKind::Credit => amount.value(),
            EntryKind::Debit => -amount.value(),
        }
    }
}

impl core::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREDIT" => Ok(EntryKind::Credit),
            "DEBIT" => Ok(EntryKind::Debit),
            other => Err(DomainError::validation(format!(
                "unknown entry kind '{other}' (expected CREDIT or DEBIT)"
            ))),
        }
    }
}
