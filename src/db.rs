//! SQLite connection setup for the vault database.
//!
//! One pool per process; WAL journaling so ingestion writes do not block
//! the CLI's reads. The database file and any missing parent directories
//! are created on first connect.

use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::DbConfig;

/// Pool ceiling. The pipeline and the CLI share one pool; SQLite allows a
/// single writer anyway, so a handful of connections is plenty.
const MAX_CONNECTIONS: u32 = 5;

pub async fn connect(db: &DbConfig) -> Result<SqlitePool> {
    if let Some(parent) = db.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db.path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    Ok(pool)
}
