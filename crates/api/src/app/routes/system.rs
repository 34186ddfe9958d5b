use axum::{http::StatusCode, Json};
use serde_json::{json, Value as JsonValue};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ping() -> Json<JsonValue> {
    Json(json!({ "message": "Pong" }))
}
