//! Session API endpoints
//!
//! Handles HTTP requests for the play-area desk:
//! - GET /api/children - All sessions, newest first
//! - GET /api/children/qr/{qr} - Session by public QR id
//! - GET /api/children/by-code/{code} - Open (or latest) session of a token
//! - GET /api/children/scan/{token} - Token toggle (check-in or check-out)
//! - PUT /api/children/extend/{id} - Buy more time
//! - PUT /api/children/checkout/{id} - Manual checkout
//! - POST /api/children/{id}/reprint - Receipt of a closed session
//! - GET /api/children/history/{token} - Every session of a token

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, ApiJson, ApiQuery, AppState};
use crate::models::{CheckinDetails, Receipt, Session, Toggle};

/// Body for extend
#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub minutes: i64,
}

/// Body for manual checkout; a missing body field bills the computed overage
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub extra_minutes: i64,
}

/// Response for session lists
#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<Session>,
    pub total: usize,
}

impl From<Vec<Session>> for SessionListResponse {
    fn from(sessions: Vec<Session>) -> Self {
        Self {
            total: sessions.len(),
            sessions,
        }
    }
}

/// Build the children router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions))
        .route("/qr/{qr}", get(get_by_qr))
        .route("/by-code/{code}", get(get_by_code))
        .route("/scan/{token}", get(scan))
        .route("/extend/{id}", put(extend))
        .route("/checkout/{id}", put(checkout))
        .route("/{id}/reprint", post(reprint))
        .route("/history/{token}", get(history_by_token))
}

/// GET /api/children
async fn list_sessions(State(state): State<AppState>) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions = state.session_service.list_sessions().await?;
    Ok(Json(sessions.into()))
}

/// GET /api/children/qr/{qr}
async fn get_by_qr(
    State(state): State<AppState>,
    Path(qr): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.session_service.get_by_qr(&qr).await?))
}

/// GET /api/children/by-code/{code}
async fn get_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.session_service.get_by_code(&code).await?))
}

/// GET /api/children/scan/{token}
async fn scan(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ApiQuery(details): ApiQuery<CheckinDetails>,
) -> Result<Json<Toggle>, ApiError> {
    let toggle = state.session_service.toggle(&token, details).await?;
    Ok(Json(toggle))
}

/// PUT /api/children/extend/{id}
async fn extend(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ExtendRequest>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.session_service.extend(&id, body.minutes).await?))
}

/// PUT /api/children/checkout/{id}
async fn checkout(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Option<Json<CheckoutRequest>>, JsonRejection>,
) -> Result<Json<Session>, ApiError> {
    let Json(body) = body?.unwrap_or_default();
    Ok(Json(state.session_service.checkout(&id, body.extra_minutes).await?))
}

/// POST /api/children/{id}/reprint
async fn reprint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Receipt>, ApiError> {
    Ok(Json(state.session_service.reprint(&id).await?))
}

/// GET /api/children/history/{token}
async fn history_by_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions = state.session_service.history_by_token(&token).await?;
    Ok(Json(sessions.into()))
}
