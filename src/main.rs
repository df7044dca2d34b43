//! Playdesk - Session tracking and billing for supervised play areas

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use playdesk::{
    api::{self, AppState, RequestStats},
    config::Config,
    db::{
        self,
        repositories::{SqlxHistoryRepository, SqlxSessionRepository},
    },
    services::{HistoryService, SessionService},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "playdesk=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting playdesk...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!(
        policy = %config.billing.version,
        currency = %config.billing.currency,
        "Configuration loaded"
    );

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Create repositories
    let session_repo = SqlxSessionRepository::boxed(pool.clone());
    let history_repo = SqlxHistoryRepository::boxed(pool.clone());

    // Initialize services
    let session_service = Arc::new(
        SessionService::new(session_repo.clone(), config.billing.clone())
            .with_token_rules(config.token.clone())
            .with_store_timeout(config.store.timeout()),
    );
    let history_service = Arc::new(
        HistoryService::new(history_repo, session_repo)
            .with_offset(config.reporting.offset())
            .with_store_timeout(config.store.timeout()),
    );

    // Build application state
    let state = AppState {
        pool: pool.clone(),
        session_service,
        history_service,
        request_stats: Arc::new(RequestStats::new()),
    };

    // Build router
    let app = api::build_router(state, &config.server.cors_origin);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    tracing::info!("Shut down cleanly");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
