//! Job store: connection pool, migrations, and health check.
//!
//! SQLite via sqlx. The store is the single shared mutable resource in the
//! system; every mutation goes through the operations in [`jobs`], each an
//! independently atomic statement or transaction.

pub mod jobs;

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::Result;

/// Job store handle. Owns the connection pool and the queue's retry policy.
pub struct Db {
    pool: SqlitePool,
    /// Retry budget applied when a job doesn't carry its own.
    pub default_max_attempts: u32,
    /// Base delay for retry backoff; doubles per attempt.
    pub retry_backoff: Duration,
    /// Ceiling on the retry backoff.
    pub backoff_cap: Duration,
}

impl Db {
    /// Open or create a job store at the given URL (e.g. "sqlite://mailq.db").
    ///
    /// WAL mode so readers don't block the single writer, and a busy timeout
    /// so concurrent claimants queue on the write lock instead of erroring.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self::with_pool(pool))
    }

    /// Create an in-memory job store (for testing).
    ///
    /// Pinned to a single pooled connection: each SQLite in-memory database
    /// is private to its connection, so the pool must never open a second
    /// one or drop the first.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self::with_pool(pool))
    }

    fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            default_max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(300),
        }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the connection pool (for submodules).
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
