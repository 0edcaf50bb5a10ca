//! Text and image extraction for uploaded documents.
//!
//! Extraction is pipeline-layer: the coordinator supplies raw bytes plus a
//! MIME type; this module returns per-page plain text and any embedded
//! JPEG images found on those pages. Captioning of the images is the
//! caller's concern — extraction stays synchronous and side-effect free.
//!
//! Paginated documents (PDF) are opened page by page so a batch step can
//! extract only its window without touching the rest of the file.

use lopdf::{Dictionary, Document, Object};

/// MIME types the pipeline accepts.
pub const MIME_PDF: &str = "application/pdf";

const IMAGE_MIMES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];
const TEXT_MIMES: &[&str] = &["text/plain", "text/markdown", "text/csv"];

/// Cap on embedded images considered per page.
const MAX_IMAGES_PER_PAGE: usize = 8;

/// How a MIME type is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Page-addressable; goes through the batch chain.
    Paginated,
    /// Single-page image; content is a generated caption.
    Image,
    /// Single-page plain text.
    Text,
}

/// Classify a MIME type, or `None` if the pipeline cannot process it.
pub fn classify_mime(mime_type: &str) -> Option<DocumentKind> {
    let base = mime_type
        .split(';')
        .next()
        .unwrap_or(mime_type)
        .trim()
        .to_ascii_lowercase();
    if base == MIME_PDF {
        Some(DocumentKind::Paginated)
    } else if IMAGE_MIMES.contains(&base.as_str()) {
        Some(DocumentKind::Image)
    } else if TEXT_MIMES.contains(&base.as_str()) {
        Some(DocumentKind::Text)
    } else {
        None
    }
}

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => {
                write!(f, "unsupported content-type: {}", ct)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// One extracted page: its text and any embedded JPEG images.
#[derive(Debug, Clone)]
pub struct PdfPage {
    pub number: i64,
    pub text: String,
    pub jpeg_images: Vec<Vec<u8>>,
}

/// Number of pages in a PDF.
pub fn pdf_page_count(bytes: &[u8]) -> Result<i64, ExtractError> {
    let doc = Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(doc.get_pages().len() as i64)
}

/// Extract text and embedded images for pages `first..=last` (1-based,
/// inclusive). Pages past the end of the document are ignored.
pub fn extract_pdf_pages(bytes: &[u8], first: i64, last: i64) -> Result<Vec<PdfPage>, ExtractError> {
    let doc = Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let pages = doc.get_pages();

    let mut out = Vec::new();
    for (page_no, page_id) in pages.iter() {
        let n = *page_no as i64;
        if n < first || n > last {
            continue;
        }

        // A page with no text layer is not an error; it may still carry
        // images worth captioning.
        let text = doc.extract_text(&[*page_no]).unwrap_or_default();

        let jpeg_images = page_jpeg_images(&doc, *page_id).unwrap_or_default();

        out.push(PdfPage {
            number: n,
            text: normalize_whitespace(&text),
            jpeg_images,
        });
    }

    Ok(out)
}

/// Decode a plain-text upload. Invalid UTF-8 byte sequences are replaced
/// rather than failing the job.
pub fn extract_plain_text(bytes: &[u8]) -> String {
    normalize_whitespace(&String::from_utf8_lossy(bytes))
}

/// Collapse runs of blank lines and trim the edges. PDF text extraction in
/// particular leaves padding that only wastes chunk budget.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(trimmed);
    }
    out.trim().to_string()
}

/// Walk a page's XObject resources and return raw DCTDecode (JPEG)
/// streams. Other image encodings are skipped.
fn page_jpeg_images(doc: &Document, page_id: (u32, u16)) -> Result<Vec<Vec<u8>>, ExtractError> {
    let page_dict = resolve_dict(doc, doc.get_object(page_id).ok())?;
    let Some(page_dict) = page_dict else {
        return Ok(Vec::new());
    };

    let resources = resolve_dict(doc, page_dict.get(b"Resources").ok())?;
    let Some(resources) = resources else {
        return Ok(Vec::new());
    };

    let xobjects = resolve_dict(doc, resources.get(b"XObject").ok())?;
    let Some(xobjects) = xobjects else {
        return Ok(Vec::new());
    };

    let mut images = Vec::new();
    for (_, value) in xobjects.iter() {
        if images.len() >= MAX_IMAGES_PER_PAGE {
            break;
        }
        let obj = match value {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(o) => o,
                Err(_) => continue,
            },
            other => other,
        };
        let Object::Stream(stream) = obj else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|o| o.as_name().ok())
            .map(|n| n == b"Image")
            .unwrap_or(false);
        if is_image && has_dct_filter(&stream.dict) {
            images.push(stream.content.clone());
        }
    }

    Ok(images)
}

fn has_dct_filter(dict: &Dictionary) -> bool {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => name == b"DCTDecode",
        Ok(Object::Array(filters)) => filters
            .iter()
            .any(|f| matches!(f, Object::Name(n) if n == b"DCTDecode")),
        _ => false,
    }
}

/// Resolve an object that may be a reference down to a dictionary.
fn resolve_dict<'a>(
    doc: &'a Document,
    obj: Option<&'a Object>,
) -> Result<Option<&'a Dictionary>, ExtractError> {
    let Some(obj) = obj else {
        return Ok(None);
    };
    let obj = match obj {
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(o) => o,
            Err(_) => return Ok(None),
        },
        other => other,
    };
    Ok(obj.as_dict().ok())
}
