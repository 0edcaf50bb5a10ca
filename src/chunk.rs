//! Sliding-window text chunker.
//!
//! Splits page content into overlapping fixed-size windows. The function is
//! pure and deterministic: identical input always yields identical output,
//! which keeps re-processed batches from corrupting the index.
//!
//! Chunk indices are derived from the page position via [`chunk_index_base`]
//! rather than a runtime counter, so chunks written by different batch steps
//! of the same file can never collide.

/// Spacing between the index ranges of consecutive pages. A single page
/// would need more than a thousand chunks to overflow its range, which at
/// the default window size would be a megabyte of text on one page.
pub const CHUNK_INDEX_STRIDE: i64 = 1000;

/// First chunk_index for a page (1-based page numbers).
pub fn chunk_index_base(page_number: i64) -> i64 {
    (page_number - 1) * CHUNK_INDEX_STRIDE
}

/// Split `text` into windows of `size` characters advancing by
/// `size - overlap`, always emitting the final partial window. Empty input
/// yields no chunks. Window edges respect UTF-8 character boundaries.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    assert!(size > 0, "chunk size must be > 0");
    assert!(overlap < size, "overlap must be smaller than size");

    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char boundary, plus the end of the text.
    let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    boundaries.push(text.len());

    let total_chars = boundaries.len() - 1;
    let step = size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + size).min(total_chars);
        chunks.push(text[boundaries[start]..boundaries[end]].to_string());
        if end == total_chars {
            break;
        }
        start += step;
    }

    chunks
}
