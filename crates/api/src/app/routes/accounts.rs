use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use purse_core::AccountId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_accounts))
        .route("/:id", get(get_account))
        .route("/:id/transactions", get(list_transactions))
        .route("/:id/audit", get(audit_account))
}

fn parse_account_id(raw: &str) -> Result<AccountId, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_account_id", "invalid account id"))
}

pub async fn list_accounts(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.accounts().await {
        Ok(items) => (StatusCode::OK, Json(dto::AccountsResponse { items })).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let account_id = match parse_account_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.account(account_id).await {
        Ok(account) => (StatusCode::OK, Json(account)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let account_id = match parse_account_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.transactions(account_id).await {
        Ok(items) => (
            StatusCode::OK,
            Json(dto::TransactionsResponse { account_id, items }),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn audit_account(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let account_id = match parse_account_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.verify_account(account_id).await {
        Ok(audit) => (StatusCode::OK, Json(audit)).into_response(),
        Err(e) => errors::audit_error_to_response(e),
    }
}
