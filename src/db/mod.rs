//! Database module for SQLite persistence
//!
//! Holds the licensing entities, their access grants and realm memberships.

mod graph_store;
mod repository;
mod schema;

pub use graph_store::*;
pub use repository::*;
pub use schema::*;

use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Transaction;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Result;

/// Create a new database connection pool
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    initialize_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory pool. Every `:memory:` connection is its own
/// database, so the pool must never open a second one.
pub async fn create_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    initialize_schema(&pool).await?;

    Ok(pool)
}

/// Begin a transaction that holds the write lock from its first statement,
/// as `BEGIN IMMEDIATE` does.
///
/// Read-modify-write work must start this way. A deferred transaction that
/// reads first cannot wait out a concurrent writer under WAL and fails with
/// `SQLITE_BUSY_SNAPSHOT` instead.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    let mut tx = pool.begin().await?;
    // an empty write still takes the lock, waiting up to the busy timeout
    sqlx::query("UPDATE users SET id = id WHERE 0")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}
