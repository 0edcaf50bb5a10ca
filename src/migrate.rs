use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db).await?;

    // File records — one per uploaded document.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            user_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            folder_id TEXT,
            size INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            page_count INTEGER,
            url TEXT,
            preview_url TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Ingestion job queue.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            storage_path TEXT NOT NULL,
            user_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            folder_id TEXT,
            original_name TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            error TEXT,
            file_id TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Vector-indexed chunk objects.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS doc_chunks (
            chunk_id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            user_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            folder_id TEXT,
            page_number INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            content_type TEXT NOT NULL,
            text TEXT NOT NULL,
            UNIQUE(file_id, chunk_index)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES doc_chunks(chunk_id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_doc_chunks_user ON doc_chunks(user_id, class_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_doc_chunks_file ON doc_chunks(file_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_user ON files(user_id)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
