//! API layer - HTTP handlers and routing
//!
//! This module contains all HTTP API endpoints of the play-area desk.
//! It includes:
//! - Session endpoints (scan toggle, extend, checkout, reprint, lookups)
//! - History ledger and report endpoints
//! - Health check

pub mod children;
pub mod health;
pub mod history;
pub mod middleware;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, RequestStats};

/// Build the API router (mounted under `/api`)
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .nest("/children", children::router())
        .nest("/history", history::router())
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    Router::new()
        .nest("/api", build_api_router())
        .fallback(not_found)
        .layer(cors_layer(cors_origin))
        .layer(TraceLayer::new_for_http())
        // Request stats middleware (outermost layer, runs for all requests)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state)
}

fn cors_layer(cors_origin: &str) -> CorsLayer {
    let origin = match cors_origin.trim() {
        "*" => AllowOrigin::any(),
        value => match value.parse::<HeaderValue>() {
            Ok(origin) => AllowOrigin::exact(origin),
            Err(_) => {
                tracing::warn!(cors_origin, "Invalid CORS origin, allowing any");
                AllowOrigin::any()
            }
        },
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE])
}

async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenConfig;
    use crate::db::repositories::{SqlxHistoryRepository, SqlxSessionRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::RatePolicy;
    use crate::services::{HistoryService, SessionService};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let session_repo = SqlxSessionRepository::boxed(pool.clone());
        let session_service = SessionService::new(session_repo.clone(), RatePolicy::default())
            .with_token_rules(TokenConfig {
                rescan_guard_ms: 0,
                ..TokenConfig::default()
            });
        let history_service = HistoryService::new(SqlxHistoryRepository::boxed(pool.clone()), session_repo);

        let state = AppState {
            pool,
            session_service: Arc::new(session_service),
            history_service: Arc::new(history_service),
            request_stats: Arc::new(RequestStats::new()),
        };
        build_router(state, "*")
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app().await;
        let (status, body) = send(&app, "GET", "/api/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert!(body["now"].is_string());
        assert_eq!(body["database"], "sqlite");

        send(&app, "GET", "/api/children", None).await;
        let (_, body) = send(&app, "GET", "/api/health", None).await;
        assert!(body["total_requests"].as_u64().unwrap() >= 2);
        assert!(body["avg_response_time_us"].is_number());
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_not_found() {
        let app = test_app().await;
        let (status, body) = send(&app, "GET", "/api/nope", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_scan_round_trip() {
        let app = test_app().await;

        let (status, body) = send(
            &app,
            "GET",
            "/api/children/scan/12345678?name=Ali&parent_name=Dilnoza",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "checkin");
        assert_eq!(body["session"]["name"], "Ali");
        let id = body["session"]["id"].as_str().unwrap().to_string();
        let qr = body["session"]["qr_code"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "GET", &format!("/api/children/qr/{}", qr), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id.as_str());

        let (status, body) = send(&app, "GET", "/api/children/by-code/12345678", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id.as_str());

        let (status, body) = send(&app, "GET", "/api/children/scan/12345678", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "checkout");
        assert_eq!(body["receipt"]["session_id"], id.as_str());
        assert_eq!(body["receipt"]["total"], 50_000);

        let (status, body) = send(&app, "GET", &format!("/api/history/by-session/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paid_amount"], 50_000);

        let (status, body) = send(&app, "GET", "/api/children/history/12345678", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
    }

    #[tokio::test]
    async fn test_invalid_token_is_bad_request() {
        let app = test_app().await;
        let (status, body) = send(&app, "GET", "/api/children/scan/12ab", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_extend_checkout_and_reprint() {
        let app = test_app().await;
        let (_, body) = send(&app, "GET", "/api/children/scan/12345678", None).await;
        let id = body["session"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/children/extend/{}", id),
            Some(serde_json::json!({ "minutes": 30 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["included_minutes"], 90);

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/children/extend/{}", id),
            Some(serde_json::json!({ "minutes": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = send(&app, "POST", &format!("/api/children/{}/reprint", id), None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/children/checkout/{}", id),
            Some(serde_json::json!({ "extraMinutes": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["extra_minutes"], 10);
        assert_eq!(body["paid_amount"], 60_000);

        let (status, _) = send(&app, "PUT", &format!("/api/children/checkout/{}", id), None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = send(&app, "POST", &format!("/api/children/{}/reprint", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 60_000);

        let (status, _) = send(&app, "PUT", "/api/children/extend/missing", Some(serde_json::json!({ "minutes": 5 }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_endpoints() {
        let app = test_app().await;
        let (_, body) = send(&app, "GET", "/api/children/scan/12345678", None).await;
        let id = body["session"]["id"].as_str().unwrap().to_string();
        send(&app, "GET", "/api/children/scan/12345678", None).await;

        let (status, body) = send(&app, "GET", "/api/history?limit=5000&page=0", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page"], 1);
        assert_eq!(body["limit"], 1000);
        assert_eq!(body["total"], 1);
        assert_eq!(body["totals"]["totalAmount"], 50_000);

        let (status, body) = send(&app, "GET", "/api/history/daily", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalCount"], 1);

        let (status, body) = send(&app, "GET", "/api/history/range", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = send(&app, "GET", "/api/history/range?from=2020-01-01", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalCount"], 1);

        let (status, body) = send(&app, "POST", &format!("/api/history/backfill/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], id.as_str());

        let (status, body) = send(&app, "GET", "/api/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        let (status, _) = send(&app, "POST", "/api/history/backfill/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_input_uses_error_envelope() {
        let app = test_app().await;
        let (_, body) = send(&app, "GET", "/api/children/scan/12345678", None).await;
        let id = body["session"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/children/extend/{}", id),
            Some(serde_json::json!({ "minutes": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/children/checkout/{}", id),
            Some(serde_json::json!({ "extraMinutes": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = send(&app, "GET", "/api/history?page=abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = send(&app, "GET", "/api/children/by-code/12345678", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["exit_time"].is_null());
    }
}
