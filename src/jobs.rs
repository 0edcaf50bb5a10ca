//! Ingestion job queue.
//!
//! A job row is created when an upload is registered and consumed by the
//! coordinator. Status transitions are monotonic — pending → processing →
//! completed | failed — and the pending→processing transition happens in a
//! single UPDATE, so two runners can never claim the same job.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{IngestJob, JobStatus};

/// Insert a new pending job and return its id.
pub async fn enqueue_job(pool: &SqlitePool, job: &IngestJob) -> Result<String> {
    let id = if job.id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        job.id.clone()
    };
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO jobs
            (id, storage_path, user_id, class_id, folder_id, original_name,
             mime_type, size, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)
        "#,
    )
    .bind(&id)
    .bind(&job.storage_path)
    .bind(&job.user_id)
    .bind(&job.class_id)
    .bind(&job.folder_id)
    .bind(&job.original_name)
    .bind(&job.mime_type)
    .bind(job.size)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Claim the oldest pending job, atomically moving it to `processing`.
/// Returns `None` when the queue is empty.
pub async fn claim_next_pending(pool: &SqlitePool) -> Result<Option<IngestJob>> {
    let row = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'processing'
        WHERE id = (
            SELECT id FROM jobs WHERE status = 'pending'
            ORDER BY created_at, id LIMIT 1
        )
        RETURNING id, storage_path, user_id, class_id, folder_id,
                  original_name, mime_type, size
        "#,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| IngestJob {
        id: r.get("id"),
        storage_path: r.get("storage_path"),
        user_id: r.get("user_id"),
        class_id: r.get("class_id"),
        folder_id: r.get("folder_id"),
        original_name: r.get("original_name"),
        mime_type: r.get("mime_type"),
        size: r.get("size"),
    }))
}

/// Record the file created for a job so operators can correlate the two.
pub async fn attach_file(pool: &SqlitePool, job_id: &str, file_id: &str) -> Result<()> {
    sqlx::query("UPDATE jobs SET file_id = ? WHERE id = ?")
        .bind(file_id)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn complete_job(pool: &SqlitePool, job_id: &str) -> Result<()> {
    set_status(pool, job_id, JobStatus::Completed, None).await
}

/// Mark a job failed, preserving the error message for inspection.
/// Failures are terminal; re-running requires a new job.
pub async fn fail_job(pool: &SqlitePool, job_id: &str, error: &str) -> Result<()> {
    set_status(pool, job_id, JobStatus::Failed, Some(error)).await
}

async fn set_status(
    pool: &SqlitePool,
    job_id: &str,
    status: JobStatus,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE jobs SET status = ?, error = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(error)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Jobs in submission order with their status and error, newest last.
pub async fn list_jobs(pool: &SqlitePool) -> Result<Vec<(String, String, String, Option<String>)>> {
    let rows = sqlx::query(
        "SELECT id, original_name, status, error FROM jobs ORDER BY created_at, id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| {
            (
                r.get("id"),
                r.get("original_name"),
                r.get("status"),
                r.get("error"),
            )
        })
        .collect())
}
