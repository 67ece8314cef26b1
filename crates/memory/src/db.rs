//! Shared SQLite pool setup.

use cadence_core::error::StoreError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;

/// Open (creating if missing) a WAL-mode SQLite pool.
///
/// Accepts a file path or a `sqlite:` URL. In-memory databases are
/// per-connection, so they get a single-connection pool.
pub async fn open_pool(path: &str) -> Result<SqlitePool, StoreError> {
    let in_memory = path.contains(":memory:");
    let options = if path.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
    } else {
        SqliteConnectOptions::new().filename(path)
    }
    .create_if_missing(true)
    .journal_mode(SqliteJournalMode::Wal)
    .synchronous(SqliteSynchronous::Normal);

    SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 4 })
        .connect_with(options)
        .await
        .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))
}

/// Run a list of idempotent DDL statements.
pub async fn migrate(pool: &SqlitePool, statements: &[(&str, &str)]) -> Result<(), StoreError> {
    for (label, sql) in statements {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("{label}: {e}")))?;
    }
    Ok(())
}

/// Create the parent directory of a database file.
pub fn ensure_parent_dir(path: &std::path::Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Storage(format!("{}: {e}", parent.display()))),
        _ => Ok(()),
    }
}
