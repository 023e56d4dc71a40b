//! Database initialization
//!
//! Opens (or creates) the SQLite database with the pragmas every TCV
//! service relies on. Table creation belongs to the owning crate.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Default SQLite busy timeout
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Open a file-backed pool, creating the database if needed
///
/// WAL mode allows concurrent readers with one writer, which is what the
/// per-assessment audit writes need.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(DEFAULT_BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    Ok(pool)
}

/// Open a private in-memory database
///
/// An in-memory SQLite database lives only as long as its connection, so the
/// pool is pinned to a single connection that is never recycled.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    Ok(pool)
}
