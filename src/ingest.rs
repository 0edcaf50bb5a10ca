//! Ingestion coordinator and page-batch driver.
//!
//! The coordinator owns the per-file lifecycle: it claims a queued job,
//! creates the file record, downloads the bytes, and routes by MIME type.
//! Paginated documents are processed as a chain of bounded batch steps —
//! each step re-downloads the source, handles a fixed page window, writes
//! its chunks, and hands a cursor to the next step. All cross-step state
//! lives in the database and the cursor; steps share no memory, so any
//! step can run on any machine.
//!
//! Failure semantics: any error aborts the chain, marks the file `error`
//! and the job `failed` (message preserved), and emits no successor. No
//! automatic retry; re-ingesting requires a new job, whose first batch
//! clears the file's previously indexed chunks.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;

use crate::chunk::{chunk_index_base, chunk_text};
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::extract::{self, DocumentKind};
use crate::files;
use crate::index;
use crate::jobs;
use crate::llm::ChatClient;
use crate::models::{BatchCursor, FileStatus, IndexedChunk, IngestJob};
use crate::storage;

/// Outcome of one completed job, for CLI reporting.
pub struct IngestStats {
    pub file_id: String,
    pub page_count: i64,
    pub batches: u64,
    pub chunks_written: u64,
}

/// Claim and process pending jobs until the queue is empty (or `limit`
/// jobs have been handled). A failed job does not stop the run.
pub async fn run_pending(config: &Config, limit: Option<usize>) -> Result<()> {
    let pool = db::connect(&config.db).await?;

    let mut processed = 0usize;
    let mut failed = 0usize;

    while limit.map_or(true, |l| processed + failed < l) {
        let Some(job) = jobs::claim_next_pending(&pool).await? else {
            break;
        };

        println!("job {} — {}", job.id, job.original_name);
        match run_job(config, &pool, &job).await {
            Ok(stats) => {
                println!("  pages: {}", stats.page_count);
                println!("  batches: {}", stats.batches);
                println!("  chunks written: {}", stats.chunks_written);
                println!("  status: processed_text");
                processed += 1;
            }
            Err(e) => {
                eprintln!("  status: failed — {:#}", e);
                failed += 1;
            }
        }
    }

    println!("run");
    println!("  completed: {}", processed);
    println!("  failed: {}", failed);
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Process one claimed job end to end. The job row must already be in
/// `processing`. On return the job's terminal status matches the file's.
pub async fn run_job(config: &Config, pool: &SqlitePool, job: &IngestJob) -> Result<IngestStats> {
    let file_id = files::create_for_job(pool, job).await?;
    jobs::attach_file(pool, &job.id, &file_id).await?;
    files::set_status(pool, &file_id, FileStatus::Processing).await?;

    match ingest_file(config, pool, job, &file_id).await {
        Ok(stats) => {
            jobs::complete_job(pool, &job.id).await?;
            Ok(stats)
        }
        Err(e) => {
            // Terminal failure: file and job both end in their error
            // states, message kept for the operator. Partial chunks stay
            // indexed for inspection; a re-ingest clears them.
            files::set_status(pool, &file_id, FileStatus::Error).await?;
            jobs::fail_job(pool, &job.id, &format!("{:#}", e)).await?;
            Err(e)
        }
    }
}

async fn ingest_file(
    config: &Config,
    pool: &SqlitePool,
    job: &IngestJob,
    file_id: &str,
) -> Result<IngestStats> {
    let bytes = storage::fetch_bytes(&config.storage, &job.storage_path).await?;

    let kind = match extract::classify_mime(&job.mime_type) {
        Some(kind) => kind,
        None => bail!("unsupported content-type: {}", job.mime_type),
    };

    match kind {
        DocumentKind::Paginated => {
            let total_pages = extract::pdf_page_count(&bytes)
                .with_context(|| format!("failed to open {}", job.original_name))?;

            if total_pages == 0 {
                finalize(config, pool, file_id, &job.storage_path, 0).await?;
                return Ok(IngestStats {
                    file_id: file_id.to_string(),
                    page_count: 0,
                    batches: 0,
                    chunks_written: 0,
                });
            }

            // A fresh chain starts clean: drop anything a previous
            // attempt for this file left in the index.
            index::delete_file_chunks(pool, file_id).await?;

            let mut cursor = BatchCursor {
                file_id: file_id.to_string(),
                storage_path: job.storage_path.clone(),
                user_id: job.user_id.clone(),
                class_id: job.class_id.clone(),
                folder_id: job.folder_id.clone(),
                original_name: job.original_name.clone(),
                current_page: 1,
                total_pages,
            };

            let mut batches = 0u64;
            let mut chunks_written = 0u64;

            loop {
                let (successor, written) = process_batch(config, pool, &cursor).await?;
                batches += 1;
                chunks_written += written;
                match successor {
                    Some(next) => cursor = next,
                    None => break,
                }
            }

            Ok(IngestStats {
                file_id: file_id.to_string(),
                page_count: total_pages,
                batches,
                chunks_written,
            })
        }
        DocumentKind::Image => {
            // A standalone image is a one-page document whose content is
            // its caption. Without an LLM there is nothing to index, but
            // the file still finalizes.
            let content = match caption_client(config) {
                Some(client) => client
                    .caption_image(&bytes, &job.mime_type)
                    .await
                    .with_context(|| format!("failed to caption {}", job.original_name))?,
                None => String::new(),
            };
            let written = index_page(config, pool, job, file_id, 1, &content).await?;
            finalize(config, pool, file_id, &job.storage_path, 1).await?;
            Ok(IngestStats {
                file_id: file_id.to_string(),
                page_count: 1,
                batches: 0,
                chunks_written: written,
            })
        }
        DocumentKind::Text => {
            let content = extract::extract_plain_text(&bytes);
            let written = index_page(config, pool, job, file_id, 1, &content).await?;
            finalize(config, pool, file_id, &job.storage_path, 1).await?;
            Ok(IngestStats {
                file_id: file_id.to_string(),
                page_count: 1,
                batches: 0,
                chunks_written: written,
            })
        }
    }
}

/// One step of the batch chain. Processes the cursor's page window and
/// returns the successor cursor, or `None` after the final batch has
/// finalized the file. Also returns the number of chunks written.
pub async fn process_batch(
    config: &Config,
    pool: &SqlitePool,
    cursor: &BatchCursor,
) -> Result<(Option<BatchCursor>, u64)> {
    let (start, end) = page_window(
        cursor.current_page,
        cursor.total_pages,
        config.ingestion.batch_pages,
    );

    // Stateless step: re-download, open only this window's pages.
    let bytes = storage::fetch_bytes(&config.storage, &cursor.storage_path).await?;
    let pages = extract::extract_pdf_pages(&bytes, start, end)?;

    let captioner = caption_client(config);

    let mut chunks: Vec<IndexedChunk> = Vec::new();
    for page in &pages {
        let mut content = page.text.clone();

        for image in &page.jpeg_images {
            let Some(client) = &captioner else { break };
            // Captioning enriches the page; a failed caption is not worth
            // failing the batch over.
            match client.caption_image(image, "image/jpeg").await {
                Ok(caption) if !caption.is_empty() => {
                    if !content.is_empty() {
                        content.push_str("\n\n");
                    }
                    content.push_str(&format!("[Image: {}]", caption));
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!(
                        "Warning: caption failed on page {} of {}: {}",
                        page.number, cursor.original_name, e
                    );
                }
            }
        }

        let base = chunk_index_base(page.number);
        for (i, text) in chunk_text(&content, config.chunking.size, config.chunking.overlap)
            .into_iter()
            .enumerate()
        {
            chunks.push(IndexedChunk {
                text,
                file_id: cursor.file_id.clone(),
                file_name: cursor.original_name.clone(),
                user_id: cursor.user_id.clone(),
                class_id: cursor.class_id.clone(),
                folder_id: cursor.folder_id.clone(),
                page_number: page.number,
                chunk_index: base + i as i64,
                content_type: extract::MIME_PDF.to_string(),
            });
        }
    }

    let written = embed_and_write(config, pool, &chunks).await?;

    if end < cursor.total_pages {
        let mut next = cursor.clone();
        next.current_page = end + 1;
        return Ok((Some(next), written));
    }

    finalize(
        config,
        pool,
        &cursor.file_id,
        &cursor.storage_path,
        cursor.total_pages,
    )
    .await?;
    Ok((None, written))
}

/// Page window for one batch: `[current, current + batch_pages - 1]`
/// clipped to the document's last page.
pub fn page_window(current_page: i64, total_pages: i64, batch_pages: i64) -> (i64, i64) {
    let end = (current_page + batch_pages - 1).min(total_pages);
    (current_page, end)
}

/// Chunk, embed, and index a single-page document's content. Empty
/// content writes nothing and is not an error.
async fn index_page(
    config: &Config,
    pool: &SqlitePool,
    job: &IngestJob,
    file_id: &str,
    page_number: i64,
    content: &str,
) -> Result<u64> {
    index::delete_file_chunks(pool, file_id).await?;

    let base = chunk_index_base(page_number);
    let chunks: Vec<IndexedChunk> = chunk_text(content, config.chunking.size, config.chunking.overlap)
        .into_iter()
        .enumerate()
        .map(|(i, text)| IndexedChunk {
            text,
            file_id: file_id.to_string(),
            file_name: job.original_name.clone(),
            user_id: job.user_id.clone(),
            class_id: job.class_id.clone(),
            folder_id: job.folder_id.clone(),
            page_number,
            chunk_index: base + i as i64,
            content_type: job.mime_type.clone(),
        })
        .collect();

    embed_and_write(config, pool, &chunks).await
}

async fn embed_and_write(
    config: &Config,
    pool: &SqlitePool,
    chunks: &[IndexedChunk],
) -> Result<u64> {
    if chunks.is_empty() {
        return Ok(0);
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedding::embed_texts(provider.as_ref(), &config.embedding, &texts).await?;

    index::write_chunks(pool, chunks, &vectors).await?;
    Ok(chunks.len() as u64)
}

async fn finalize(
    config: &Config,
    pool: &SqlitePool,
    file_id: &str,
    storage_path: &str,
    page_count: i64,
) -> Result<()> {
    let url = storage::public_url(&config.storage, storage_path);
    files::finalize(pool, file_id, page_count, url.as_deref()).await?;
    notify_preview(config, file_id);
    Ok(())
}

/// Ask the preview-generation collaborator to render a preview for the
/// finalized file. Fire-and-forget: the pipeline does not wait.
fn notify_preview(config: &Config, file_id: &str) {
    let Some(endpoint) = config.storage.preview_webhook.clone() else {
        return;
    };
    let file_id = file_id.to_string();
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let payload = serde_json::json!({ "file_id": file_id });
        if let Err(e) = client.post(&endpoint).json(&payload).send().await {
            eprintln!("Warning: preview notification failed: {}", e);
        }
    });
}

fn caption_client(config: &Config) -> Option<ChatClient> {
    if !config.llm.is_enabled() {
        return None;
    }
    match ChatClient::new(&config.llm) {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Warning: captioning unavailable: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_index_base;
    use std::collections::HashSet;

    #[test]
    fn window_clips_to_last_page() {
        assert_eq!(page_window(1, 7, 3), (1, 3));
        assert_eq!(page_window(4, 7, 3), (4, 6));
        assert_eq!(page_window(7, 7, 3), (7, 7));
        assert_eq!(page_window(1, 2, 3), (1, 2));
    }

    #[test]
    fn chaining_covers_every_page_once() {
        let total = 7i64;
        let batch = 3i64;
        let mut current = 1i64;
        let mut seen = Vec::new();
        let mut steps = 0;

        loop {
            let (start, end) = page_window(current, total, batch);
            seen.extend(start..=end);
            steps += 1;
            if end < total {
                current = end + 1;
            } else {
                break;
            }
        }

        assert_eq!(steps, 3);
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn chunk_indices_never_collide_across_batches() {
        // Simulate a multi-batch ingestion: pages 1..=9 in windows of 3,
        // several chunks per page, and assert global uniqueness.
        let mut all_indices = HashSet::new();
        for batch_start in [1i64, 4, 7] {
            let (start, end) = page_window(batch_start, 9, 3);
            for page in start..=end {
                for local in 0..5i64 {
                    let idx = chunk_index_base(page) + local;
                    assert!(
                        all_indices.insert(idx),
                        "duplicate chunk_index {} on page {}",
                        idx,
                        page
                    );
                }
            }
        }
        assert_eq!(all_indices.len(), 9 * 5);
    }

    #[test]
    fn chunk_indices_order_follows_pages() {
        // Page-proximate ordering: every index on page N sorts before
        // every index on page N+1.
        let max_on_3 = chunk_index_base(3) + 999;
        let min_on_4 = chunk_index_base(4);
        assert!(max_on_3 < min_on_4);
    }
}
