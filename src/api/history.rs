//! History API endpoints
//!
//! - GET /api/history - Filtered, paginated ledger
//! - GET /api/history/daily - One local day
//! - GET /api/history/range - Span of local days
//! - GET /api/history/by-session/{id} - Ledger row of a session
//! - POST /api/history/backfill/{id} - Rebuild the ledger row of a session

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, ApiQuery, AppState};
use crate::models::{DailyReport, HistoryPage, HistoryRecord, RangeReport};
use crate::services::HistoryQuery;

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Build the history router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_history))
        .route("/daily", get(daily))
        .route("/range", get(range))
        .route("/by-session/{id}", get(by_session))
        .route("/backfill/{id}", post(backfill))
}

/// GET /api/history
async fn list_history(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<Json<HistoryPage>, ApiError> {
    Ok(Json(state.history_service.query(&query).await?))
}

/// GET /api/history/daily
async fn daily(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<DailyQuery>,
) -> Result<Json<DailyReport>, ApiError> {
    let report = state
        .history_service
        .daily_report(query.date.as_deref())
        .await?;
    Ok(Json(report))
}

/// GET /api/history/range
async fn range(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RangeQuery>,
) -> Result<Json<RangeReport>, ApiError> {
    let report = state
        .history_service
        .range_report(query.from.as_deref(), query.to.as_deref())
        .await?;
    Ok(Json(report))
}

/// GET /api/history/by-session/{id}
async fn by_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryRecord>, ApiError> {
    Ok(Json(state.history_service.by_session(&id).await?))
}

/// POST /api/history/backfill/{id}
async fn backfill(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryRecord>, ApiError> {
    Ok(Json(state.history_service.backfill(&id).await?))
}
