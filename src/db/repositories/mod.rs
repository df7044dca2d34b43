//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository owns the SQL for one table, for both drivers.

pub mod history;
pub mod session;

pub use history::{HistoryRepository, SqlxHistoryRepository};
pub use session::{SessionRepository, SqlxSessionRepository};

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};

/// Decode an epoch-millisecond column
pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow!("Stored timestamp out of range: {}", ms))
}

/// Whether a driver error is a UNIQUE / PRIMARY KEY violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_millis() {
        let dt = from_millis(1_700_000_000_123).unwrap();
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_123);
        assert!(from_millis(i64::MAX).is_err());
    }

    #[test]
    fn test_non_database_error_is_not_unique_violation() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
