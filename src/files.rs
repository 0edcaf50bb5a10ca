//! File record persistence.
//!
//! One row per uploaded document. Rows are created when a job is first
//! claimed and advanced by the ingestion pipeline; this subsystem never
//! deletes them.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{FileRecord, FileStatus, IngestJob};

/// Create the file record for a claimed job, initially `queued`.
pub async fn create_for_job(pool: &SqlitePool, job: &IngestJob) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO files
            (id, display_name, user_id, class_id, folder_id, size, mime_type,
             status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'queued', ?)
        "#,
    )
    .bind(&id)
    .bind(&job.original_name)
    .bind(&job.user_id)
    .bind(&job.class_id)
    .bind(&job.folder_id)
    .bind(job.size)
    .bind(&job.mime_type)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(id)
}

pub async fn set_status(pool: &SqlitePool, file_id: &str, status: FileStatus) -> Result<()> {
    sqlx::query("UPDATE files SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(file_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Terminal success transition: record the page count and durable URL.
pub async fn finalize(
    pool: &SqlitePool,
    file_id: &str,
    page_count: i64,
    url: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE files SET status = ?, page_count = ?, url = ? WHERE id = ?",
    )
    .bind(FileStatus::ProcessedText.as_str())
    .bind(page_count)
    .bind(url)
    .bind(file_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(pool: &SqlitePool, file_id: &str) -> Result<Option<FileRecord>> {
    let row = sqlx::query(
        r#"
        SELECT id, display_name, user_id, class_id, folder_id, size, mime_type,
               status, page_count, url, preview_url
        FROM files WHERE id = ?
        "#,
    )
    .bind(file_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| record_from_row(&r)))
}

/// All file records, optionally scoped to one user.
pub async fn list(pool: &SqlitePool, user_id: Option<&str>) -> Result<Vec<FileRecord>> {
    let rows = match user_id {
        Some(user) => {
            sqlx::query(
                r#"
                SELECT id, display_name, user_id, class_id, folder_id, size, mime_type,
                       status, page_count, url, preview_url
                FROM files WHERE user_id = ? ORDER BY created_at, id
                "#,
            )
            .bind(user)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT id, display_name, user_id, class_id, folder_id, size, mime_type,
                       status, page_count, url, preview_url
                FROM files ORDER BY created_at, id
                "#,
            )
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.iter().map(record_from_row).collect())
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> FileRecord {
    FileRecord {
        id: row.get("id"),
        display_name: row.get("display_name"),
        user_id: row.get("user_id"),
        class_id: row.get("class_id"),
        folder_id: row.get("folder_id"),
        size: row.get("size"),
        mime_type: row.get("mime_type"),
        status: row.get("status"),
        page_count: row.get("page_count"),
        url: row.get("url"),
        preview_url: row.get("preview_url"),
    }
}
