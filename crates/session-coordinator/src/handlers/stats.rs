//! Stats handler for `GET /api/health` and `GET /api/stats`.

use crate::routes::AppState;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub status: String,
    pub active_connections: usize,
    pub active_meetings: usize,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Live connection and meeting counts from the hub.
///
/// Always 200 so load balancers see a body; `status` is `unhealthy` when the
/// hub no longer answers.
#[instrument(skip_all, name = "sc.handlers.stats")]
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let (status, active_connections, active_meetings) = match state.hub.status().await {
        Ok(hub) => ("healthy", hub.connections, hub.rooms),
        Err(_) => ("unhealthy", 0, 0),
    };

    Json(StatsResponse {
        status: status.to_string(),
        active_connections,
        active_meetings,
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
