//! Vector index reads and writes.
//!
//! Chunks and their embedding vectors live in the `doc_chunks` and
//! `chunk_vectors` tables; similarity ranking decodes the stored BLOBs and
//! computes cosine similarity in Rust. Writers never race: chunk indices
//! are derived from page position, so concurrent batches of the same file
//! cannot collide, and `file_id` scopes batches of different files.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding;
use crate::models::{IndexedChunk, RetrievedChunk};

/// Batched upsert of chunks and their vectors in one transaction.
pub async fn write_chunks(
    pool: &SqlitePool,
    chunks: &[IndexedChunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    anyhow::ensure!(
        chunks.len() == vectors.len(),
        "chunk/vector count mismatch: {} vs {}",
        chunks.len(),
        vectors.len()
    );

    let mut tx = pool.begin().await?;

    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        let chunk_id = Uuid::new_v4().to_string();
        let blob = embedding::vec_to_blob(vector);

        sqlx::query(
            r#"
            INSERT INTO doc_chunks
                (chunk_id, file_id, file_name, user_id, class_id, folder_id,
                 page_number, chunk_index, content_type, text)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_id, chunk_index) DO UPDATE SET
                file_name = excluded.file_name,
                page_number = excluded.page_number,
                content_type = excluded.content_type,
                text = excluded.text
            "#,
        )
        .bind(&chunk_id)
        .bind(&chunk.file_id)
        .bind(&chunk.file_name)
        .bind(&chunk.user_id)
        .bind(&chunk.class_id)
        .bind(&chunk.folder_id)
        .bind(chunk.page_number)
        .bind(chunk.chunk_index)
        .bind(&chunk.content_type)
        .bind(&chunk.text)
        .execute(&mut *tx)
        .await?;

        // The upsert above may have kept an existing chunk_id; resolve it
        // so the vector row always pairs with the surviving chunk row.
        let actual_id: String =
            sqlx::query_scalar("SELECT chunk_id FROM doc_chunks WHERE file_id = ? AND chunk_index = ?")
                .bind(&chunk.file_id)
                .bind(chunk.chunk_index)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, file_id, embedding)
            VALUES (?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                file_id = excluded.file_id,
                embedding = excluded.embedding
            "#,
        )
        .bind(&actual_id)
        .bind(&chunk.file_id)
        .bind(&blob)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Delete every indexed chunk for a file. Used when a file is re-ingested
/// from scratch so stale chunks never mix with the new chain's output.
pub async fn delete_file_chunks(pool: &SqlitePool, file_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunk_vectors WHERE file_id = ?")
        .bind(file_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM doc_chunks WHERE file_id = ?")
        .bind(file_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Nearest-neighbor search scoped to one user and optionally one class.
/// Returns the top `top_k` chunks by cosine similarity, ties broken by
/// chunk id for deterministic output.
pub async fn search_chunks(
    pool: &SqlitePool,
    query_vec: &[f32],
    user_id: &str,
    class_id: Option<&str>,
    top_k: i64,
) -> Result<Vec<RetrievedChunk>> {
    let rows = match class_id {
        Some(class) => {
            sqlx::query(
                r#"
                SELECT c.chunk_id, c.file_id, c.file_name, c.page_number,
                       c.content_type, c.text, v.embedding
                FROM doc_chunks c
                JOIN chunk_vectors v ON v.chunk_id = c.chunk_id
                WHERE c.user_id = ? AND c.class_id = ?
                "#,
            )
            .bind(user_id)
            .bind(class)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT c.chunk_id, c.file_id, c.file_name, c.page_number,
                       c.content_type, c.text, v.embedding
                FROM doc_chunks c
                JOIN chunk_vectors v ON v.chunk_id = c.chunk_id
                WHERE c.user_id = ?
                "#,
            )
            .bind(user_id)
            .fetch_all(pool)
            .await?
        }
    };

    let mut scored: Vec<RetrievedChunk> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            let score = embedding::cosine_similarity(query_vec, &vec) as f64;
            RetrievedChunk {
                chunk_id: row.get("chunk_id"),
                file_id: row.get("file_id"),
                file_name: row.get("file_name"),
                page_number: row.get("page_number"),
                content_type: row.get("content_type"),
                text: row.get("text"),
                score,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    scored.truncate(top_k as usize);

    Ok(scored)
}

/// Distinct page numbers indexed for a file. Exposed for status reporting.
pub async fn file_page_numbers(pool: &SqlitePool, file_id: &str) -> Result<Vec<i64>> {
    let pages: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT page_number FROM doc_chunks WHERE file_id = ? ORDER BY page_number",
    )
    .bind(file_id)
    .fetch_all(pool)
    .await?;
    Ok(pages)
}
