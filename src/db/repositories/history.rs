//! History repository
//!
//! Database operations for the append-only ledger of closed sessions.
//!
//! This module provides:
//! - `HistoryRepository` trait defining the interface for ledger access
//! - `SqlxHistoryRepository` implementing the trait for SQLite and MySQL
//!
//! Filtering, counting and the amount/minute totals are computed in SQL over
//! the whole filtered set, not over a fetched page.

use crate::config::DatabaseDriver;
use crate::db::pool::{require_mysql, require_sqlite};
use crate::db::DynDatabasePool;
use crate::models::{HistoryFilter, HistoryRecord, HistoryTotals, NewHistoryRecord};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{MySql, MySqlPool, Row, Sqlite, SqlitePool};
use std::sync::Arc;

use super::from_millis;

/// History repository trait
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Insert or overwrite the ledger row of a session
    async fn upsert(&self, record: &NewHistoryRecord) -> Result<HistoryRecord>;

    /// Ledger row of a session
    async fn get_by_session(&self, session_id: &str) -> Result<Option<HistoryRecord>>;

    /// One page of matching rows, most recent exit first
    async fn list(&self, filter: &HistoryFilter, limit: u32, offset: u64) -> Result<Vec<HistoryRecord>>;

    /// Every matching row, most recent exit first
    async fn list_all(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>>;

    /// Count, amount and minute totals over every matching row
    async fn totals(&self, filter: &HistoryFilter) -> Result<HistoryTotals>;
}

/// SQLx-based history repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxHistoryRepository {
    pool: DynDatabasePool,
}

impl SqlxHistoryRepository {
    /// Create a new SQLx history repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn HistoryRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl HistoryRepository for SqlxHistoryRepository {
    async fn upsert(&self, record: &NewHistoryRecord) -> Result<HistoryRecord> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                upsert_history_sqlite(require_sqlite(self.pool.as_ref())?, record).await?
            }
            DatabaseDriver::Mysql => {
                upsert_history_mysql(require_mysql(self.pool.as_ref())?, record).await?
            }
        }

        self.get_by_session(&record.session_id)
            .await?
            .ok_or_else(|| anyhow!("Ledger row for {} missing after upsert", record.session_id))
    }

    async fn get_by_session(&self, session_id: &str) -> Result<Option<HistoryRecord>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_by_session_sqlite(require_sqlite(self.pool.as_ref())?, session_id).await
            }
            DatabaseDriver::Mysql => {
                get_by_session_mysql(require_mysql(self.pool.as_ref())?, session_id).await
            }
        }
    }

    async fn list(&self, filter: &HistoryFilter, limit: u32, offset: u64) -> Result<Vec<HistoryRecord>> {
        let page = Some((limit, offset));
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_history_sqlite(require_sqlite(self.pool.as_ref())?, filter, page).await
            }
            DatabaseDriver::Mysql => {
                list_history_mysql(require_mysql(self.pool.as_ref())?, filter, page).await
            }
        }
    }

    async fn list_all(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_history_sqlite(require_sqlite(self.pool.as_ref())?, filter, None).await
            }
            DatabaseDriver::Mysql => {
                list_history_mysql(require_mysql(self.pool.as_ref())?, filter, None).await
            }
        }
    }

    async fn totals(&self, filter: &HistoryFilter) -> Result<HistoryTotals> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                totals_sqlite(require_sqlite(self.pool.as_ref())?, filter).await
            }
            DatabaseDriver::Mysql => totals_mysql(require_mysql(self.pool.as_ref())?, filter).await,
        }
    }
}

const HISTORY_COLUMNS: &str =
    "id, session_id, token_code, entry_time, exit_time, paid_amount, name, recorded_at";

const INSERT_HISTORY_SQL: &str = r#"
    INSERT INTO history (session_id, token_code, entry_time, exit_time, paid_amount, name, recorded_at)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

/// Bind value of a filter placeholder
enum FilterArg<'a> {
    Text(&'a str),
    Millis(i64),
}

/// Build the WHERE clause (with leading space) for a filter
fn filter_clause(filter: &HistoryFilter) -> (String, Vec<FilterArg<'_>>) {
    let mut conditions = Vec::new();
    let mut args = Vec::new();

    if let Some(token) = &filter.token {
        conditions.push("token_code = ?");
        args.push(FilterArg::Text(token.as_str()));
    }
    if let Some(from) = filter.exit_from {
        conditions.push("exit_time >= ?");
        args.push(FilterArg::Millis(from.timestamp_millis()));
    }
    if let Some(to) = filter.exit_to {
        conditions.push("exit_time <= ?");
        args.push(FilterArg::Millis(to.timestamp_millis()));
    }

    if conditions.is_empty() {
        (String::new(), args)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), args)
    }
}

fn list_sql(where_clause: &str, paged: bool) -> String {
    let mut sql = format!(
        "SELECT {} FROM history{} ORDER BY exit_time DESC, entry_time DESC, id DESC",
        HISTORY_COLUMNS, where_clause
    );
    if paged {
        sql.push_str(" LIMIT ? OFFSET ?");
    }
    sql
}

fn offset_i64(offset: u64) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

// ============================================================================
// SQLite implementations
// ============================================================================

/// Append a ledger row on any SQLite executor (pool or open transaction)
pub(crate) async fn insert_history_sqlite<'e, E>(executor: E, record: &NewHistoryRecord) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(INSERT_HISTORY_SQL)
        .bind(&record.session_id)
        .bind(&record.token_code)
        .bind(record.entry_time.timestamp_millis())
        .bind(record.exit_time.timestamp_millis())
        .bind(record.paid_amount)
        .bind(&record.name)
        .bind(record.recorded_at.timestamp_millis())
        .execute(executor)
        .await
        .context("Failed to insert history record")?;

    Ok(result.last_insert_rowid())
}

async fn upsert_history_sqlite(pool: &SqlitePool, record: &NewHistoryRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO history (session_id, token_code, entry_time, exit_time, paid_amount, name, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_id) DO UPDATE SET
            token_code = excluded.token_code,
            entry_time = excluded.entry_time,
            exit_time = excluded.exit_time,
            paid_amount = excluded.paid_amount,
            name = excluded.name,
            recorded_at = excluded.recorded_at
        "#,
    )
    .bind(&record.session_id)
    .bind(&record.token_code)
    .bind(record.entry_time.timestamp_millis())
    .bind(record.exit_time.timestamp_millis())
    .bind(record.paid_amount)
    .bind(&record.name)
    .bind(record.recorded_at.timestamp_millis())
    .execute(pool)
    .await
    .context("Failed to upsert history record")?;

    Ok(())
}

async fn get_by_session_sqlite(pool: &SqlitePool, session_id: &str) -> Result<Option<HistoryRecord>> {
    let sql = format!("SELECT {} FROM history WHERE session_id = ?", HISTORY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(session_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get history record")?;

    match row {
        Some(row) => Ok(Some(row_to_record_sqlite(&row)?)),
        None => Ok(None),
    }
}

async fn list_history_sqlite(
    pool: &SqlitePool,
    filter: &HistoryFilter,
    page: Option<(u32, u64)>,
) -> Result<Vec<HistoryRecord>> {
    let (where_clause, args) = filter_clause(filter);
    let sql = list_sql(&where_clause, page.is_some());

    let mut query = sqlx::query(&sql);
    for arg in &args {
        query = match arg {
            FilterArg::Text(value) => query.bind(*value),
            FilterArg::Millis(value) => query.bind(*value),
        };
    }
    if let Some((limit, offset)) = page {
        query = query.bind(i64::from(limit)).bind(offset_i64(offset));
    }

    let rows = query
        .fetch_all(pool)
        .await
        .context("Failed to list history")?;

    rows.iter().map(row_to_record_sqlite).collect()
}

async fn totals_sqlite(pool: &SqlitePool, filter: &HistoryFilter) -> Result<HistoryTotals> {
    let (where_clause, args) = filter_clause(filter);
    let sql = format!(
        r#"
        SELECT COUNT(*) AS total_count,
               COALESCE(SUM(paid_amount), 0) AS total_amount,
               COALESCE(SUM((MAX(exit_time - entry_time, 0) + 59999) / 60000), 0) AS total_minutes
        FROM history{}
        "#,
        where_clause
    );

    let mut query = sqlx::query(&sql);
    for arg in &args {
        query = match arg {
            FilterArg::Text(value) => query.bind(*value),
            FilterArg::Millis(value) => query.bind(*value),
        };
    }

    let row = query
        .fetch_one(pool)
        .await
        .context("Failed to compute history totals")?;

    Ok(HistoryTotals {
        total_count: row.get("total_count"),
        total_amount: row.get("total_amount"),
        total_minutes: row.get("total_minutes"),
    })
}

fn row_to_record_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<HistoryRecord> {
    Ok(HistoryRecord {
        id: row.get("id"),
        session_id: row.get("session_id"),
        token_code: row.get("token_code"),
        entry_time: from_millis(row.get("entry_time"))?,
        exit_time: from_millis(row.get("exit_time"))?,
        paid_amount: row.get("paid_amount"),
        name: row.get("name"),
        recorded_at: from_millis(row.get("recorded_at"))?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

/// Append a ledger row on any MySQL executor (pool or open transaction)
pub(crate) async fn insert_history_mysql<'e, E>(executor: E, record: &NewHistoryRecord) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = MySql>,
{
    let result = sqlx::query(INSERT_HISTORY_SQL)
        .bind(&record.session_id)
        .bind(&record.token_code)
        .bind(record.entry_time.timestamp_millis())
        .bind(record.exit_time.timestamp_millis())
        .bind(record.paid_amount)
        .bind(&record.name)
        .bind(record.recorded_at.timestamp_millis())
        .execute(executor)
        .await
        .context("Failed to insert history record")?;

    i64::try_from(result.last_insert_id()).context("History id out of range")
}

async fn upsert_history_mysql(pool: &MySqlPool, record: &NewHistoryRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO history (session_id, token_code, entry_time, exit_time, paid_amount, name, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
            token_code = VALUES(token_code),
            entry_time = VALUES(entry_time),
            exit_time = VALUES(exit_time),
            paid_amount = VALUES(paid_amount),
            name = VALUES(name),
            recorded_at = VALUES(recorded_at)
        "#,
    )
    .bind(&record.session_id)
    .bind(&record.token_code)
    .bind(record.entry_time.timestamp_millis())
    .bind(record.exit_time.timestamp_millis())
    .bind(record.paid_amount)
    .bind(&record.name)
    .bind(record.recorded_at.timestamp_millis())
    .execute(pool)
    .await
    .context("Failed to upsert history record")?;

    Ok(())
}

async fn get_by_session_mysql(pool: &MySqlPool, session_id: &str) -> Result<Option<HistoryRecord>> {
    let sql = format!("SELECT {} FROM history WHERE session_id = ?", HISTORY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(session_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get history record")?;

    match row {
        Some(row) => Ok(Some(row_to_record_mysql(&row)?)),
        None => Ok(None),
    }
}

async fn list_history_mysql(
    pool: &MySqlPool,
    filter: &HistoryFilter,
    page: Option<(u32, u64)>,
) -> Result<Vec<HistoryRecord>> {
    let (where_clause, args) = filter_clause(filter);
    let sql = list_sql(&where_clause, page.is_some());

    let mut query = sqlx::query(&sql);
    for arg in &args {
        query = match arg {
            FilterArg::Text(value) => query.bind(*value),
            FilterArg::Millis(value) => query.bind(*value),
        };
    }
    if let Some((limit, offset)) = page {
        query = query.bind(i64::from(limit)).bind(offset_i64(offset));
    }

    let rows = query
        .fetch_all(pool)
        .await
        .context("Failed to list history")?;

    rows.iter().map(row_to_record_mysql).collect()
}

async fn totals_mysql(pool: &MySqlPool, filter: &HistoryFilter) -> Result<HistoryTotals> {
    let (where_clause, args) = filter_clause(filter);
    let sql = format!(
        r#"
        SELECT COUNT(*) AS total_count,
               CAST(COALESCE(SUM(paid_amount), 0) AS SIGNED) AS total_amount,
               CAST(COALESCE(SUM((GREATEST(exit_time - entry_time, 0) + 59999) DIV 60000), 0) AS SIGNED)
                   AS total_minutes
        FROM history{}
        "#,
        where_clause
    );

    let mut query = sqlx::query(&sql);
    for arg in &args {
        query = match arg {
            FilterArg::Text(value) => query.bind(*value),
            FilterArg::Millis(value) => query.bind(*value),
        };
    }

    let row = query
        .fetch_one(pool)
        .await
        .context("Failed to compute history totals")?;

    Ok(HistoryTotals {
        total_count: row.get("total_count"),
        total_amount: row.get("total_amount"),
        total_minutes: row.get("total_minutes"),
    })
}

fn row_to_record_mysql(row: &sqlx::mysql::MySqlRow) -> Result<HistoryRecord> {
    Ok(HistoryRecord {
        id: row.get("id"),
        session_id: row.get("session_id"),
        token_code: row.get("token_code"),
        entry_time: from_millis(row.get("entry_time"))?,
        exit_time: from_millis(row.get("exit_time"))?,
        paid_amount: row.get("paid_amount"),
        name: row.get("name"),
        recorded_at: from_millis(row.get("recorded_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    async fn setup() -> SqlxHistoryRepository {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxHistoryRepository::new(pool)
    }

    /// Ledger append the way the checkout transaction does it
    async fn append(repo: &SqlxHistoryRepository, rec: &NewHistoryRecord) -> Result<HistoryRecord> {
        insert_history_sqlite(require_sqlite(repo.pool.as_ref())?, rec).await?;
        repo.get_by_session(&rec.session_id)
            .await?
            .ok_or_else(|| anyhow!("missing ledger row"))
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, minute, 0).unwrap()
    }

    fn record(session_id: &str, token: &str, entry: DateTime<Utc>, minutes: i64, paid: i64) -> NewHistoryRecord {
        let exit = entry + Duration::minutes(minutes);
        NewHistoryRecord {
            session_id: session_id.to_string(),
            token_code: token.to_string(),
            entry_time: entry,
            exit_time: exit,
            paid_amount: paid,
            name: None,
            recorded_at: exit,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_by_session() {
        let repo = setup().await;

        let inserted = append(&repo, &record("s1", "12345678", at(10, 0), 75, 65_000))
            .await
            .unwrap();
        assert!(inserted.id > 0);
        assert_eq!(inserted.duration_minutes(), 75);

        let fetched = repo.get_by_session("s1").await.unwrap().unwrap();
        assert_eq!(fetched, inserted);
        assert!(repo.get_by_session("s2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_twice_is_rejected() {
        let repo = setup().await;
        let rec = record("s1", "12345678", at(10, 0), 75, 65_000);

        append(&repo, &rec).await.unwrap();
        let err = append(&repo, &rec).await.unwrap_err();
        let sqlx_err = err.downcast_ref::<sqlx::Error>().expect("driver error");
        assert!(crate::db::repositories::is_unique_violation(sqlx_err));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_existing_row() {
        let repo = setup().await;
        let first = append(&repo, &record("s1", "12345678", at(10, 0), 75, 65_000))
            .await
            .unwrap();

        let updated = repo
            .upsert(&record("s1", "12345678", at(10, 0), 80, 70_000))
            .await
            .unwrap();
        assert_eq!(updated.id, first.id);
        assert_eq!(updated.paid_amount, 70_000);

        let fresh = repo
            .upsert(&record("s2", "12345678", at(12, 0), 10, 50_000))
            .await
            .unwrap();
        assert_ne!(fresh.id, first.id);
        assert_eq!(repo.totals(&HistoryFilter::default()).await.unwrap().total_count, 2);
    }

    #[tokio::test]
    async fn test_filter_page_and_totals() {
        let repo = setup().await;
        append(&repo, &record("s1", "11111111", at(9, 0), 60, 50_000)).await.unwrap();
        append(&repo, &record("s2", "22222222", at(10, 0), 75, 65_000)).await.unwrap();
        append(&repo, &record("s3", "11111111", at(13, 0), 30, 50_000)).await.unwrap();

        let all = HistoryFilter::default();
        let page = repo.list(&all, 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].session_id, "s3");
        assert_eq!(page[1].session_id, "s2");

        let rest = repo.list(&all, 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].session_id, "s1");

        let totals = repo.totals(&all).await.unwrap();
        assert_eq!(totals.total_count, 3);
        assert_eq!(totals.total_amount, 165_000);
        assert_eq!(totals.total_minutes, 165);

        let by_token = HistoryFilter {
            token: Some("11111111".to_string()),
            ..HistoryFilter::default()
        };
        let totals = repo.totals(&by_token).await.unwrap();
        assert_eq!(totals.total_count, 2);
        assert_eq!(totals.total_amount, 100_000);
        assert_eq!(repo.list_all(&by_token).await.unwrap().len(), 2);

        let window = HistoryFilter {
            token: None,
            exit_from: Some(at(10, 0)),
            exit_to: Some(at(11, 15)),
        };
        let items = repo.list_all(&window).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|r| r.session_id != "s3"));
    }

    #[tokio::test]
    async fn test_totals_round_partial_minutes_up() {
        let repo = setup().await;
        let mut rec = record("s1", "12345678", at(10, 0), 0, 50_000);
        rec.exit_time = rec.entry_time + Duration::seconds(61);
        append(&repo, &rec).await.unwrap();

        let totals = repo.totals(&HistoryFilter::default()).await.unwrap();
        assert_eq!(totals.total_minutes, 2);
    }

    #[tokio::test]
    async fn test_totals_on_empty_ledger() {
        let repo = setup().await;
        let totals = repo.totals(&HistoryFilter::default()).await.unwrap();
        assert_eq!(totals, HistoryTotals::default());
    }
}
