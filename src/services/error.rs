//! Service error taxonomy
//!
//! Every session and history operation fails with one of these kinds. Store
//! failures arrive as `anyhow::Error` from the repositories and are
//! classified by the underlying driver error.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Error type for service operations
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or out-of-range input
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Referenced session or record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the session's current state
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Lost a race against a concurrent request for the same token or session
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Store timed out or is temporarily unreachable; safe to retry
    #[error("Store unavailable: {0}")]
    TransientStore(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(anyhow::Error),
}

impl ServiceError {
    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::Conflict(_) => "CONFLICT",
            Self::TransientStore(_) => "TRANSIENT_STORE_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<sqlx::Error>() {
            Some(sqlx_err) if is_transient(sqlx_err) => {
                Self::TransientStore(format!("{:#}", err))
            }
            Some(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Self::Conflict(format!("{:#}", err))
            }
            _ => Self::InternalError(err),
        }
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => true,
        // SQLITE_BUSY / SQLITE_LOCKED, and SQLSTATE 40001 (deadlock / serialization)
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("5" | "6" | "40001")),
        _ => false,
    }
}

/// Run a store call under a deadline, classifying its failure.
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T, ServiceError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(|e| {
            let err = ServiceError::from(e);
            if matches!(err, ServiceError::InternalError(_)) {
                tracing::error!(operation, error = %err, "store operation failed");
            } else {
                tracing::warn!(operation, error = %err, "store operation failed");
            }
            err
        }),
        Err(_) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "store operation timed out");
            Err(ServiceError::TransientStore(format!(
                "{} timed out after {}ms",
                operation,
                limit.as_millis()
            )))
        }
    }
}
