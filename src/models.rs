//! Core data types that flow through the ingestion and query pipelines.

use serde::{Deserialize, Serialize};

/// Lifecycle of an uploaded file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Queued,
    Processing,
    ProcessedText,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Queued => "queued",
            FileStatus::Processing => "processing",
            FileStatus::ProcessedText => "processed_text",
            FileStatus::Error => "error",
        }
    }
}

/// Lifecycle of a queued ingestion job. Transitions are monotonic:
/// pending → processing → completed | failed. Failed jobs are never
/// re-queued automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// One row in `files` — exactly one per ingestion job.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub id: String,
    pub display_name: String,
    pub user_id: String,
    pub class_id: String,
    pub folder_id: Option<String>,
    pub size: i64,
    pub mime_type: String,
    pub status: String,
    pub page_count: Option<i64>,
    pub url: Option<String>,
    pub preview_url: Option<String>,
}

/// One row in the `jobs` queue, consumed by the ingestion coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub id: String,
    pub storage_path: String,
    pub user_id: String,
    pub class_id: String,
    pub folder_id: Option<String>,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
}

/// Ephemeral cursor driving the page-batch chain for paginated documents.
///
/// Each batch step processes pages `[current_page, current_page + B - 1]`
/// clipped to `total_pages` and yields at most one successor cursor, so
/// there is never more than one in-flight cursor per file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCursor {
    pub file_id: String,
    pub storage_path: String,
    pub user_id: String,
    pub class_id: String,
    pub folder_id: Option<String>,
    pub original_name: String,
    pub current_page: i64,
    pub total_pages: i64,
}

/// A chunk ready to be written to the vector index, carrying the metadata
/// the index stores alongside the text and vector.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub text: String,
    pub file_id: String,
    pub file_name: String,
    pub user_id: String,
    pub class_id: String,
    pub folder_id: Option<String>,
    pub page_number: i64,
    pub chunk_index: i64,
    pub content_type: String,
}

/// A chunk returned from nearest-neighbor search, with its score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub file_id: String,
    pub file_name: String,
    pub page_number: i64,
    pub content_type: String,
    pub text: String,
    pub score: f64,
}

/// Display metadata for a cited file, looked up once per distinct file.
#[derive(Debug, Clone, Serialize)]
pub struct SourceFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub url: Option<String>,
}

/// A source as presented to the model for one sub-answer. `number` is the
/// local 1-based citation index within that sub-answer only.
#[derive(Debug, Clone)]
pub struct Source {
    pub number: usize,
    pub file: SourceFile,
    pub page_number: i64,
    pub content: String,
}

/// A source in the merged response, renumbered into the global scheme and
/// deduplicated across sub-answers.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciledSource {
    pub number: usize,
    pub file: SourceFile,
    #[serde(rename = "pageNumber")]
    pub page_number: i64,
    pub content: String,
}

/// One question's answer plus the sources its citations refer to.
#[derive(Debug, Clone)]
pub struct SubAnswer {
    pub question: String,
    pub text: String,
    pub sources: Vec<Source>,
}
