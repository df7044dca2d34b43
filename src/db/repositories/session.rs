//! Session repository
//!
//! Database operations for play sessions.
//!
//! This module provides:
//! - `SessionRepository` trait defining the interface for session data access
//! - `SqlxSessionRepository` implementing the trait for SQLite and MySQL
//!
//! State transitions are guarded in SQL. Inserts only land while the token's
//! session count is unchanged, backed by the open-token unique index. Extend
//! only touches rows whose `exit_time` is still NULL; close additionally
//! requires the `paid_until` that was billed. Closing also appends the ledger
//! row in the same transaction.

use crate::config::DatabaseDriver;
use crate::db::pool::{require_mysql, require_sqlite};
use crate::db::DynDatabasePool;
use crate::models::{NewHistoryRecord, RateSnapshot, Rounding, Session, SessionClosure};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

use super::history::{insert_history_mysql, insert_history_sqlite};
use super::{from_millis, is_unique_violation};

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new open session.
    ///
    /// `prior_sessions` is the number of sessions the caller saw for the
    /// token when it decided to check in. Returns `false` without writing
    /// when that number has changed since or the token already has an open
    /// session.
    async fn insert_open(&self, session: &Session, prior_sessions: i64) -> Result<bool>;

    /// Number of sessions ever bound to a token
    async fn count_by_token(&self, token: &str) -> Result<i64>;

    /// Get session by ID
    async fn get_by_id(&self, id: &str) -> Result<Option<Session>>;

    /// Get session by its public QR identifier
    async fn get_by_qr(&self, qr_code: &str) -> Result<Option<Session>>;

    /// The open session for a token, if any
    async fn find_open_by_token(&self, token: &str) -> Result<Option<Session>>;

    /// Most recently started session for a token, open or closed
    async fn find_latest_by_token(&self, token: &str) -> Result<Option<Session>>;

    /// All sessions, newest entry first
    async fn list(&self) -> Result<Vec<Session>>;

    /// All sessions of one token, newest entry first
    async fn list_by_token(&self, token: &str) -> Result<Vec<Session>>;

    /// Add prepaid minutes to an open session.
    ///
    /// Returns `false` when no open session with that ID exists.
    async fn extend_open(&self, id: &str, minutes: i64) -> Result<bool>;

    /// Close an open session and record it in the history ledger.
    ///
    /// Returns the closed session, or `None` when the session is no longer
    /// open or its `paid_until` differs from `closure.billed_until`. Nothing
    /// is written in that case.
    async fn close(&self, id: &str, closure: &SessionClosure) -> Result<Option<Session>>;
}

/// SQLx-based session repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    /// Create a new SQLx session repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn insert_open(&self, session: &Session, prior_sessions: i64) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                insert_open_sqlite(require_sqlite(self.pool.as_ref())?, session, prior_sessions).await
            }
            DatabaseDriver::Mysql => {
                insert_open_mysql(require_mysql(self.pool.as_ref())?, session, prior_sessions).await
            }
        }
    }

    async fn count_by_token(&self, token: &str) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM sessions WHERE token_code = ?";
        let count = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query_scalar::<_, i64>(sql)
                    .bind(token)
                    .fetch_one(require_sqlite(self.pool.as_ref())?)
                    .await
            }
            DatabaseDriver::Mysql => {
                sqlx::query_scalar::<_, i64>(sql)
                    .bind(token)
                    .fetch_one(require_mysql(self.pool.as_ref())?)
                    .await
            }
        };
        count.context("Failed to count sessions for token")
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS);
        self.fetch_optional(&sql, id).await
    }

    async fn get_by_qr(&self, qr_code: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE qr_code = ?", SESSION_COLUMNS);
        self.fetch_optional(&sql, qr_code).await
    }

    async fn find_open_by_token(&self, token: &str) -> Result<Option<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE token_code = ? AND exit_time IS NULL",
            SESSION_COLUMNS
        );
        self.fetch_optional(&sql, token).await
    }

    async fn find_latest_by_token(&self, token: &str) -> Result<Option<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE token_code = ? ORDER BY entry_time DESC, id DESC LIMIT 1",
            SESSION_COLUMNS
        );
        self.fetch_optional(&sql, token).await
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions ORDER BY entry_time DESC, id DESC",
            SESSION_COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_sessions_sqlite(require_sqlite(self.pool.as_ref())?, &sql, None).await
            }
            DatabaseDriver::Mysql => {
                list_sessions_mysql(require_mysql(self.pool.as_ref())?, &sql, None).await
            }
        }
    }

    async fn list_by_token(&self, token: &str) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE token_code = ? ORDER BY entry_time DESC, id DESC",
            SESSION_COLUMNS
        );
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_sessions_sqlite(require_sqlite(self.pool.as_ref())?, &sql, Some(token)).await
            }
            DatabaseDriver::Mysql => {
                list_sessions_mysql(require_mysql(self.pool.as_ref())?, &sql, Some(token)).await
            }
        }
    }

    async fn extend_open(&self, id: &str, minutes: i64) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                extend_open_sqlite(require_sqlite(self.pool.as_ref())?, id, minutes).await
            }
            DatabaseDriver::Mysql => {
                extend_open_mysql(require_mysql(self.pool.as_ref())?, id, minutes).await
            }
        }
    }

    async fn close(&self, id: &str, closure: &SessionClosure) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                close_sqlite(require_sqlite(self.pool.as_ref())?, id, closure).await
            }
            DatabaseDriver::Mysql => {
                close_mysql(require_mysql(self.pool.as_ref())?, id, closure).await
            }
        }
    }
}

impl SqlxSessionRepository {
    async fn fetch_optional(&self, sql: &str, key: &str) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                fetch_session_sqlite(require_sqlite(self.pool.as_ref())?, sql, key).await
            }
            DatabaseDriver::Mysql => {
                fetch_session_mysql(require_mysql(self.pool.as_ref())?, sql, key).await
            }
        }
    }
}

const SESSION_COLUMNS: &str = "id, token_code, qr_code, name, parent_name, entry_time, \
     paid_until, exit_time, included_minutes, base_amount, extra_minutes, extra_fee, \
     paid_amount, policy_version, currency, per_minute, rounding_strategy, round_to";

// The insert only lands while the token's session count is still the one the
// caller read, so a scan decided on a stale view cannot open a session.
const INSERT_OPEN_SQLITE: &str = r#"
    INSERT INTO sessions (id, token_code, qr_code, name, parent_name, entry_time,
                          paid_until, included_minutes, base_amount)
    SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?
    WHERE (SELECT COUNT(*) FROM sessions WHERE token_code = ?) = ?
"#;

const INSERT_OPEN_MYSQL: &str = r#"
    INSERT INTO sessions (id, token_code, qr_code, name, parent_name, entry_time,
                          paid_until, included_minutes, base_amount)
    SELECT ?, ?, ?, ?, ?, ?, ?, ?, ? FROM DUAL
    WHERE (SELECT COUNT(*) FROM sessions WHERE token_code = ?) = ?
"#;

const EXTEND_OPEN_SQL: &str = r#"
    UPDATE sessions
    SET paid_until = paid_until + ?, included_minutes = included_minutes + ?
    WHERE id = ? AND exit_time IS NULL
"#;

const CLOSE_SQL: &str = r#"
    UPDATE sessions
    SET exit_time = ?, extra_minutes = ?, extra_fee = ?, paid_amount = ?,
        policy_version = ?, currency = ?, per_minute = ?, rounding_strategy = ?, round_to = ?
    WHERE id = ? AND exit_time IS NULL AND paid_until = ?
"#;

/// Rebuild the rate snapshot from its nullable columns
fn rate_snapshot(
    version: Option<String>,
    currency: Option<String>,
    per_minute: Option<i64>,
    strategy: Option<String>,
    round_to: Option<i64>,
) -> Result<Option<RateSnapshot>> {
    match (version, currency, per_minute, strategy, round_to) {
        (Some(version), Some(currency), Some(per_minute), Some(strategy), Some(round_to)) => {
            Ok(Some(RateSnapshot {
                version,
                currency,
                per_minute,
                rounding: Rounding {
                    strategy: strategy.parse()?,
                    round_to,
                },
            }))
        }
        _ => Ok(None),
    }
}

fn closed_history_record(session: &Session) -> Result<NewHistoryRecord> {
    let recorded_at = session
        .exit_time
        .ok_or_else(|| anyhow!("Session {} has no exit time after close", session.id))?;
    NewHistoryRecord::from_session(session, recorded_at)
        .ok_or_else(|| anyhow!("Session {} cannot be archived while open", session.id))
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn insert_open_sqlite(pool: &SqlitePool, session: &Session, prior_sessions: i64) -> Result<bool> {
    let result = sqlx::query(INSERT_OPEN_SQLITE)
        .bind(&session.id)
        .bind(&session.token_code)
        .bind(&session.qr_code)
        .bind(&session.name)
        .bind(&session.parent_name)
        .bind(session.entry_time.timestamp_millis())
        .bind(session.paid_until.timestamp_millis())
        .bind(session.included_minutes)
        .bind(session.base_amount)
        .bind(&session.token_code)
        .bind(prior_sessions)
        .execute(pool)
        .await;

    match result {
        Ok(done) => Ok(done.rows_affected() > 0),
        Err(e) if is_unique_violation(&e) => {
            if open_exists_sqlite(pool, &session.token_code).await? {
                Ok(false)
            } else {
                Err(e).context("Failed to insert session")
            }
        }
        Err(e) => Err(e).context("Failed to insert session"),
    }
}

async fn open_exists_sqlite(pool: &SqlitePool, token: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sessions WHERE token_code = ? AND exit_time IS NULL",
    )
    .bind(token)
    .fetch_one(pool)
    .await
    .context("Failed to check open session")?;

    Ok(count > 0)
}

async fn fetch_session_sqlite(pool: &SqlitePool, sql: &str, key: &str) -> Result<Option<Session>> {
    let row = sqlx::query(sql)
        .bind(key)
        .fetch_optional(pool)
        .await
        .context("Failed to get session")?;

    match row {
        Some(row) => Ok(Some(row_to_session_sqlite(&row)?)),
        None => Ok(None),
    }
}

async fn list_sessions_sqlite(pool: &SqlitePool, sql: &str, token: Option<&str>) -> Result<Vec<Session>> {
    let mut query = sqlx::query(sql);
    if let Some(token) = token {
        query = query.bind(token);
    }
    let rows = query
        .fetch_all(pool)
        .await
        .context("Failed to list sessions")?;

    rows.iter().map(row_to_session_sqlite).collect()
}

async fn extend_open_sqlite(pool: &SqlitePool, id: &str, minutes: i64) -> Result<bool> {
    let result = sqlx::query(EXTEND_OPEN_SQL)
        .bind(minutes.saturating_mul(60_000))
        .bind(minutes)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to extend session")?;

    Ok(result.rows_affected() > 0)
}

async fn close_sqlite(pool: &SqlitePool, id: &str, closure: &SessionClosure) -> Result<Option<Session>> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let result = sqlx::query(CLOSE_SQL)
        .bind(closure.exit_time.timestamp_millis())
        .bind(closure.extra_minutes)
        .bind(closure.extra_fee)
        .bind(closure.paid_amount)
        .bind(&closure.rate.version)
        .bind(&closure.rate.currency)
        .bind(closure.rate.per_minute)
        .bind(closure.rate.rounding.strategy.to_string())
        .bind(closure.rate.rounding.round_to)
        .bind(id)
        .bind(closure.billed_until.timestamp_millis())
        .execute(&mut *tx)
        .await
        .context("Failed to close session")?;

    if result.rows_affected() == 0 {
        tx.rollback().await.context("Failed to roll back close")?;
        return Ok(None);
    }

    let sql = format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to reload closed session")?;
    let session = row_to_session_sqlite(&row)?;

    insert_history_sqlite(&mut *tx, &closed_history_record(&session)?).await?;

    tx.commit().await.context("Failed to commit close")?;
    Ok(Some(session))
}

fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    let exit_time: Option<i64> = row.get("exit_time");
    Ok(Session {
        id: row.get("id"),
        token_code: row.get("token_code"),
        qr_code: row.get("qr_code"),
        name: row.get("name"),
        parent_name: row.get("parent_name"),
        entry_time: from_millis(row.get("entry_time"))?,
        paid_until: from_millis(row.get("paid_until"))?,
        exit_time: exit_time.map(from_millis).transpose()?,
        included_minutes: row.get("included_minutes"),
        base_amount: row.get("base_amount"),
        extra_minutes: row.get("extra_minutes"),
        extra_fee: row.get("extra_fee"),
        paid_amount: row.get("paid_amount"),
        rate: rate_snapshot(
            row.get("policy_version"),
            row.get("currency"),
            row.get("per_minute"),
            row.get("rounding_strategy"),
            row.get("round_to"),
        )?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn insert_open_mysql(pool: &MySqlPool, session: &Session, prior_sessions: i64) -> Result<bool> {
    let result = sqlx::query(INSERT_OPEN_MYSQL)
        .bind(&session.id)
        .bind(&session.token_code)
        .bind(&session.qr_code)
        .bind(&session.name)
        .bind(&session.parent_name)
        .bind(session.entry_time.timestamp_millis())
        .bind(session.paid_until.timestamp_millis())
        .bind(session.included_minutes)
        .bind(session.base_amount)
        .bind(&session.token_code)
        .bind(prior_sessions)
        .execute(pool)
        .await;

    match result {
        Ok(done) => Ok(done.rows_affected() > 0),
        Err(e) if is_unique_violation(&e) => {
            if open_exists_mysql(pool, &session.token_code).await? {
                Ok(false)
            } else {
                Err(e).context("Failed to insert session")
            }
        }
        Err(e) => Err(e).context("Failed to insert session"),
    }
}

async fn open_exists_mysql(pool: &MySqlPool, token: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sessions WHERE token_code = ? AND exit_time IS NULL",
    )
    .bind(token)
    .fetch_one(pool)
    .await
    .context("Failed to check open session")?;

    Ok(count > 0)
}

async fn fetch_session_mysql(pool: &MySqlPool, sql: &str, key: &str) -> Result<Option<Session>> {
    let row = sqlx::query(sql)
        .bind(key)
        .fetch_optional(pool)
        .await
        .context("Failed to get session")?;

    match row {
        Some(row) => Ok(Some(row_to_session_mysql(&row)?)),
        None => Ok(None),
    }
}

async fn list_sessions_mysql(pool: &MySqlPool, sql: &str, token: Option<&str>) -> Result<Vec<Session>> {
    let mut query = sqlx::query(sql);
    if let Some(token) = token {
        query = query.bind(token);
    }
    let rows = query
        .fetch_all(pool)
        .await
        .context("Failed to list sessions")?;

    rows.iter().map(row_to_session_mysql).collect()
}

async fn extend_open_mysql(pool: &MySqlPool, id: &str, minutes: i64) -> Result<bool> {
    let result = sqlx::query(EXTEND_OPEN_SQL)
        .bind(minutes.saturating_mul(60_000))
        .bind(minutes)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to extend session")?;

    Ok(result.rows_affected() > 0)
}

async fn close_mysql(pool: &MySqlPool, id: &str, closure: &SessionClosure) -> Result<Option<Session>> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let result = sqlx::query(CLOSE_SQL)
        .bind(closure.exit_time.timestamp_millis())
        .bind(closure.extra_minutes)
        .bind(closure.extra_fee)
        .bind(closure.paid_amount)
        .bind(&closure.rate.version)
        .bind(&closure.rate.currency)
        .bind(closure.rate.per_minute)
        .bind(closure.rate.rounding.strategy.to_string())
        .bind(closure.rate.rounding.round_to)
        .bind(id)
        .bind(closure.billed_until.timestamp_millis())
        .execute(&mut *tx)
        .await
        .context("Failed to close session")?;

    if result.rows_affected() == 0 {
        tx.rollback().await.context("Failed to roll back close")?;
        return Ok(None);
    }

    let sql = format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to reload closed session")?;
    let session = row_to_session_mysql(&row)?;

    insert_history_mysql(&mut *tx, &closed_history_record(&session)?).await?;

    tx.commit().await.context("Failed to commit close")?;
    Ok(Some(session))
}

fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Session> {
    let exit_time: Option<i64> = row.get("exit_time");
    Ok(Session {
        id: row.get("id"),
        token_code: row.get("token_code"),
        qr_code: row.get("qr_code"),
        name: row.get("name"),
        parent_name: row.get("parent_name"),
        entry_time: from_millis(row.get("entry_time"))?,
        paid_until: from_millis(row.get("paid_until"))?,
        exit_time: exit_time.map(from_millis).transpose()?,
        included_minutes: row.get("included_minutes"),
        base_amount: row.get("base_amount"),
        extra_minutes: row.get("extra_minutes"),
        extra_fee: row.get("extra_fee"),
        paid_amount: row.get("paid_amount"),
        rate: rate_snapshot(
            row.get("policy_version"),
            row.get("currency"),
            row.get("per_minute"),
            row.get("rounding_strategy"),
            row.get("round_to"),
        )?,
    })
}
