use std::str::FromStr;

use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use purse_accounting::{Account, TransactionRecord};
use purse_core::{AccountId, Amount};
use purse_infra::Applied;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `/topup` and `/withdrawal`.
///
/// `amount` is taken as raw JSON so both `100.50` and `"100.50"` are accepted.
/// serde_json is built with `arbitrary_precision`, so a numeric amount keeps
/// the digits the caller sent instead of being rounded through `f64`.
#[derive(Debug, Deserialize)]
pub struct BalanceChangeRequest {
    #[serde(alias = "user_id")]
    pub account_id: i64,
    pub amount: JsonValue,
}

impl BalanceChangeRequest {
    pub fn account_id(&self) -> AccountId {
        AccountId::new(self.account_id)
    }

    pub fn amount(&self) -> Result<Amount, axum::response::Response> {
        let value = parse_decimal(&self.amount).ok_or_else(|| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_amount",
                "Amount must be a number",
            )
        })?;

        if value <= Decimal::ZERO {
            return Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_amount",
                "Amount must be greater than zero",
            ));
        }

        Amount::new(value)
            .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_amount", e.to_string()))
    }
}

fn parse_decimal(value: &JsonValue) -> Option<Decimal> {
    match value {
        JsonValue::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        JsonValue::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct AppliedResponse {
    pub status: &'static str,
    pub transaction: TransactionRecord,
    pub balance: Decimal,
}

impl From<Applied> for AppliedResponse {
    fn from(applied: Applied) -> Self {
        Self {
            status: "success",
            transaction: applied.record,
            balance: applied.balance,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountsResponse {
    pub items: Vec<Account>,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub account_id: AccountId,
    pub items: Vec<TransactionRecord>,
}
