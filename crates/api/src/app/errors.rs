use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use purse_infra::{AuditError, LedgerError};

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        LedgerError::AccountNotFound { account_id } => json_error(
            StatusCode::NOT_FOUND,
            "account_not_found",
            format!("account {account_id} not found"),
        ),
        LedgerError::InsufficientBalance { .. } => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "insufficient_balance",
            "insufficient balance",
        ),
        LedgerError::BalanceLimitExceeded { .. } => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "balance_limit_exceeded",
            "balance limit exceeded",
        ),
        // The reason is logged by the engine; it can carry connection details.
        LedgerError::StoreUnavailable { .. } => retryable_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            "ledger store unavailable, retry later",
        ),
        LedgerError::Conflict { .. } => retryable_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "conflict",
            "concurrent update conflict, retry later",
        ),
    }
}

pub fn audit_error_to_response(err: AuditError) -> axum::response::Response {
    match err {
        AuditError::Ledger(e) => ledger_error_to_response(e),
        AuditError::Replay(e) => {
            tracing::error!(error = %e, "transaction log failed replay");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "ledger_corrupt", e.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn retryable_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
            "retryable": true,
        })),
    )
        .into_response()
}
