use axum::{routing::get, Router};

use crate::{handlers, AppState};

/// Read-only surface; there are deliberately no mutating routes.
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/progress", get(handlers::progress))
        .route("/stats", get(handlers::stats))
        .route("/databases", get(handlers::databases))
        .route("/logs", get(handlers::logs))
        .with_state(state)
}
