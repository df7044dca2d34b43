//! Database layer
//!
//! Storage for play sessions and the history ledger. It supports:
//! - SQLite (default, single-file deployment)
//! - MySQL (shared deployments)
//!
//! The driver is selected by configuration. Both backends enforce "at most
//! one open session per token" in the schema itself, so concurrent scans
//! are arbitrated by the store rather than by application locks.
//!
//! # Usage
//!
//! ```ignore
//! use playdesk::config::DatabaseConfig;
//! use playdesk::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
