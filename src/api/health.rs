//! Health endpoint
//!
//! - GET /api/health - Store reachability plus request counters

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::middleware::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub now: DateTime<Utc>,
    pub database: &'static str,
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub avg_response_time_us: f64,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = &state.request_stats;
    let ok = match state.pool.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "health check ping failed");
            false
        }
    };
    Json(HealthResponse {
        ok,
        now: Utc::now(),
        database: if state.pool.as_sqlite().is_some() { "sqlite" } else { "mysql" },
        uptime_seconds: stats.uptime_seconds(),
        total_requests: stats.total_requests(),
        failed_requests: stats.failed_requests(),
        avg_response_time_us: stats.avg_response_time_us(),
    })
}
