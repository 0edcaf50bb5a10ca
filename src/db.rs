//! SQLite connection pool.
//!
//! WAL keeps query-path readers unblocked while ingestion batches write;
//! the busy timeout covers the moments the server's job poller and a CLI
//! `nbx run` contend for the writer. Foreign keys are enforced because
//! `chunk_vectors` rows must never outlive their chunk.

use anyhow::Result;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::config::DbConfig;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn connect(config: &DbConfig) -> Result<SqlitePool> {
    if let Some(parent) = config.path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_creates_parent_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = DbConfig {
            path: tmp.path().join("nested").join("data").join("nbx.sqlite"),
        };

        let pool = connect(&config).await.unwrap();
        sqlx::query("CREATE TABLE t (x INTEGER)")
            .execute(&pool)
            .await
            .unwrap();

        assert!(config.path.exists());
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = DbConfig {
            path: tmp.path().join("fk.sqlite"),
        };
        let pool = connect(&config).await.unwrap();

        sqlx::query("CREATE TABLE parent (id TEXT PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE child (id TEXT PRIMARY KEY,
             parent_id TEXT NOT NULL REFERENCES parent(id))",
        )
        .execute(&pool)
        .await
        .unwrap();

        let orphan = sqlx::query("INSERT INTO child (id, parent_id) VALUES ('c', 'missing')")
            .execute(&pool)
            .await;
        assert!(orphan.is_err());
    }
}
