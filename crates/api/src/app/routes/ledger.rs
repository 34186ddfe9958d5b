use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use purse_core::EntryKind;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/topup", post(top_up))
        .route("/withdrawal", post(withdraw))
}

pub async fn top_up(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::BalanceChangeRequest>, JsonRejection>,
) -> axum::response::Response {
    apply(&services, EntryKind::Credit, body).await
}

pub async fn withdraw(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::BalanceChangeRequest>, JsonRejection>,
) -> axum::response::Response {
    apply(&services, EntryKind::Debit, body).await
}

async fn apply(
    services: &AppServices,
    kind: EntryKind,
    body: Result<Json<dto::BalanceChangeRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "rejected request body");
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_request_body",
                "Invalid request body",
            );
        }
    };

    let amount = match body.amount() {
        Ok(amount) => amount,
        Err(resp) => return resp,
    };

    match services.apply(body.account_id(), kind, amount).await {
        Ok(applied) => (StatusCode::OK, Json(dto::AppliedResponse::from(applied))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
