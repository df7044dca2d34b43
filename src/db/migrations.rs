//! Database migrations module
//!
//! Code-based migrations embedded as SQL strings, with one variant for SQLite
//! and one for MySQL.
//!
//! # Usage
//!
//! ```ignore
//! use playdesk::db::{create_pool, migrations};
//!
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```
//!
//! Timestamps are stored as epoch milliseconds (`BIGINT`), money as integer
//! minor units. The "one open session per token" rule lives in the schema:
//! SQLite uses a partial unique index, MySQL a unique key over a generated
//! column that is NULL once the session is closed.

use anyhow::{Context, Result};
use sqlx::{MySqlPool, Row, SqlitePool};

use super::pool::{require_mysql, require_sqlite};
use super::DynDatabasePool;
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements for SQLite
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL
    pub up_mysql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_sessions_table",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(36) PRIMARY KEY,
                token_code VARCHAR(32) NOT NULL,
                qr_code VARCHAR(64) NOT NULL UNIQUE,
                name VARCHAR(255),
                parent_name VARCHAR(255),
                entry_time BIGINT NOT NULL,
                paid_until BIGINT NOT NULL,
                exit_time BIGINT,
                included_minutes BIGINT NOT NULL,
                base_amount BIGINT NOT NULL,
                extra_minutes BIGINT NOT NULL DEFAULT 0,
                extra_fee BIGINT NOT NULL DEFAULT 0,
                paid_amount BIGINT NOT NULL DEFAULT 0,
                policy_version VARCHAR(64),
                currency VARCHAR(16),
                per_minute BIGINT,
                rounding_strategy VARCHAR(16),
                round_to BIGINT,
                CHECK (paid_until >= entry_time),
                CHECK (exit_time IS NULL OR exit_time >= entry_time),
                CHECK (extra_minutes >= 0 AND extra_fee >= 0)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS uq_sessions_open_token
                ON sessions(token_code) WHERE exit_time IS NULL;
            CREATE INDEX IF NOT EXISTS idx_sessions_token_code ON sessions(token_code);
            CREATE INDEX IF NOT EXISTS idx_sessions_entry_time ON sessions(entry_time);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(36) PRIMARY KEY,
                token_code VARCHAR(32) NOT NULL,
                qr_code VARCHAR(64) NOT NULL UNIQUE,
                name VARCHAR(255),
                parent_name VARCHAR(255),
                entry_time BIGINT NOT NULL,
                paid_until BIGINT NOT NULL,
                exit_time BIGINT NULL,
                included_minutes BIGINT NOT NULL,
                base_amount BIGINT NOT NULL,
                extra_minutes BIGINT NOT NULL DEFAULT 0,
                extra_fee BIGINT NOT NULL DEFAULT 0,
                paid_amount BIGINT NOT NULL DEFAULT 0,
                policy_version VARCHAR(64) NULL,
                currency VARCHAR(16) NULL,
                per_minute BIGINT NULL,
                rounding_strategy VARCHAR(16) NULL,
                round_to BIGINT NULL,
                open_token VARCHAR(32)
                    AS (CASE WHEN exit_time IS NULL THEN token_code ELSE NULL END) STORED,
                UNIQUE KEY uq_sessions_open_token (open_token),
                INDEX idx_sessions_token_code (token_code),
                INDEX idx_sessions_entry_time (entry_time),
                CHECK (paid_until >= entry_time),
                CHECK (exit_time IS NULL OR exit_time >= entry_time),
                CHECK (extra_minutes >= 0 AND extra_fee >= 0)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci;
        "#,
    },
    Migration {
        version: 2,
        name: "create_history_table",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id VARCHAR(36) NOT NULL UNIQUE,
                token_code VARCHAR(32) NOT NULL,
                entry_time BIGINT NOT NULL,
                exit_time BIGINT NOT NULL,
                paid_amount BIGINT NOT NULL DEFAULT 0,
                name VARCHAR(255),
                recorded_at BIGINT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_exit_time ON history(exit_time);
            CREATE INDEX IF NOT EXISTS idx_history_token_code ON history(token_code);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS history (
                id BIGINT AUTO_INCREMENT PRIMARY KEY,
                session_id VARCHAR(36) NOT NULL UNIQUE,
                token_code VARCHAR(32) NOT NULL,
                entry_time BIGINT NOT NULL,
                exit_time BIGINT NOT NULL,
                paid_amount BIGINT NOT NULL DEFAULT 0,
                name VARCHAR(255) NULL,
                recorded_at BIGINT NOT NULL,
                INDEX idx_history_exit_time (exit_time),
                INDEX idx_history_token_code (token_code)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci;
        "#,
    },
];

/// Run all pending migrations
///
/// Returns the number of migrations applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied_versions = get_applied_versions(pool).await?;

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

/// Create the migrations tracking table if it doesn't exist
async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

/// Versions already recorded in `_migrations`
async fn get_applied_versions(pool: &DynDatabasePool) -> Result<Vec<i32>> {
    match pool.driver() {
        DatabaseDriver::Sqlite => {
            let rows = sqlx::query("SELECT version FROM _migrations ORDER BY version")
                .fetch_all(require_sqlite(pool.as_ref())?)
                .await?;
            Ok(rows.iter().map(|row| row.get("version")).collect())
        }
        DatabaseDriver::Mysql => {
            let rows = sqlx::query("SELECT version FROM _migrations ORDER BY version")
                .fetch_all(require_mysql(pool.as_ref())?)
                .await?;
            Ok(rows.iter().map(|row| row.get("version")).collect())
        }
    }
}

/// Apply a single migration
async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    match pool.driver() {
        DatabaseDriver::Sqlite => apply_migration_sqlite(require_sqlite(pool.as_ref())?, migration).await,
        DatabaseDriver::Mysql => apply_migration_mysql(require_mysql(pool.as_ref())?, migration).await,
    }
}

async fn apply_migration_sqlite(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    for statement in split_sql_statements(migration.up_sqlite) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(pool)
        .await?;

    Ok(())
}

async fn apply_migration_mysql(pool: &MySqlPool, migration: &Migration) -> Result<()> {
    for statement in split_sql_statements(migration.up_mysql) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, skipping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

/// Check if a string contains only SQL comments
fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}
