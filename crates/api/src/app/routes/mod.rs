use axum::{routing::get, Router};

pub mod accounts;
pub mod ledger;
pub mod system;

/// Router for the versioned ledger endpoints.
pub fn router() -> Router {
    Router::new()
        .merge(ledger::router())
        .nest("/accounts", accounts::router())
}

/// Liveness endpoints, mounted at the root.
pub fn system_router() -> Router {
    Router::new()
        .route("/ping", get(system::ping))
        .route("/health", get(system::health))
}
