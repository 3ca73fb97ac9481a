use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::AppResult;
use crate::tasks::QueueStats;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Depth of every queue, in priority order
pub async fn queue_stats(State(state): State<AppState>) -> AppResult<Json<Vec<QueueStats>>> {
    let stats = state.broker.queue_stats().await?;
    Ok(Json(stats))
}
