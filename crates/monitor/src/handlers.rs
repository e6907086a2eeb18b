use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::AppState;

const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 1000;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let (reachable, total) = state.store.health_overview();
    let status = if reachable == total {
        "ok"
    } else if reachable == 0 {
        "down"
    } else {
        "degraded"
    };

    let progress = state.progress.snapshot();
    Json(json!({
        "status": status,
        "uptime_s": state.uptime_s(),
        "active_session_id": progress.active_session_id,
    }))
}

pub async fn progress(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.progress.snapshot()))
}

pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    let progress = state.progress.snapshot();
    let success_rate = if progress.processed > 0 {
        progress.succeeded as f64 / progress.processed as f64
    } else {
        0.0
    };

    match state.store.stats() {
        Ok(stats) => Json(json!({
            "total_pages": stats.total_pages,
            "total_links": stats.total_links,
            "pages_last_day": stats.pages_last_day,
            "processed": progress.processed,
            "succeeded": progress.succeeded,
            "failed": progress.failed,
            "success_rate": success_rate,
        })),
        Err(e) => {
            // Store trouble degrades the surface, it never breaks it.
            warn!(error = %e, "stats query failed");
            Json(json!({
                "degraded": true,
                "processed": progress.processed,
                "succeeded": progress.succeeded,
                "failed": progress.failed,
                "success_rate": success_rate,
            }))
        }
    }
}

pub async fn databases(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.store.snapshot()))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

pub async fn logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Json<Value> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);
    Json(json!(state.logs.recent(limit)))
}
