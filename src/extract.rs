//! Text extraction for downloaded artifacts (ZIP-of-markup, PDF, raw markup).
//!
//! The pipeline treats each bundle as one opaque text blob: markup is
//! tag-stripped rather than parsed, PDF pages are concatenated. Extraction
//! never panics; errors are returned and the pipeline skips the artifact.

use std::io::Read;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ContainerKind;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Extraction error. Content errors are never retried by callers; the
/// server-side bytes will not change.
#[derive(Debug)]
pub enum ExtractError {
    /// The byte stream is not a readable archive.
    CorruptArchive(String),
    /// The byte stream is not a readable document.
    CorruptDocument(String),
    /// The capability for this container kind is not compiled in.
    Unsupported(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::CorruptArchive(e) => write!(f, "corrupt archive: {}", e),
            ExtractError::CorruptDocument(e) => write!(f, "corrupt document: {}", e),
            ExtractError::Unsupported(e) => write!(f, "unsupported format: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract a normalized text blob from raw artifact bytes.
pub fn extract_artifact(kind: ContainerKind, bytes: &[u8]) -> Result<String, ExtractError> {
    match kind {
        ContainerKind::Zip => extract_zip(bytes),
        ContainerKind::Pdf => extract_pdf(bytes),
        ContainerKind::Markup => Ok(extract_markup(bytes)),
        ContainerKind::Unknown => Err(ExtractError::Unsupported(
            "unknown container kind".to_string(),
        )),
    }
}

/// Extract text from every markup entry of a ZIP archive.
///
/// Entries are decoded as UTF-8 with invalid sequences replaced, tag-stripped,
/// and joined with a blank-line separator. Non-markup entries are ignored.
pub fn extract_zip(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::CorruptArchive(e.to_string()))?;

    let mut parts: Vec<String> = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ExtractError::CorruptArchive(e.to_string()))?;
        let name = entry.name().to_ascii_lowercase();
        if !(name.ends_with(".xml") || name.ends_with(".html") || name.ends_with(".htm")) {
            continue;
        }

        let mut raw = Vec::new();
        (&mut entry)
            .take(MAX_ENTRY_BYTES)
            .read_to_end(&mut raw)
            .map_err(|e| ExtractError::CorruptArchive(e.to_string()))?;
        if raw.len() as u64 >= MAX_ENTRY_BYTES {
            return Err(ExtractError::CorruptArchive(format!(
                "ZIP entry {} exceeds size limit ({} bytes)",
                entry.name(),
                MAX_ENTRY_BYTES
            )));
        }

        let text = extract_markup(&raw);
        if !text.is_empty() {
            parts.push(text);
        }
    }

    Ok(parts.join("\n\n"))
}

/// Extract text from a PDF, one string per page, empty pages dropped.
#[cfg(feature = "pdf")]
pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::CorruptDocument(e.to_string()))?;
    let parts: Vec<String> = pages
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    Ok(parts.join("\n\n"))
}

#[cfg(not(feature = "pdf"))]
pub fn extract_pdf(_bytes: &[u8]) -> Result<String, ExtractError> {
    Err(ExtractError::Unsupported(
        "PDF extraction not compiled in (enable the `pdf` feature)".to_string(),
    ))
}

/// Decode bytes as UTF-8 markup (lossy, never fatal) and strip tags.
pub fn extract_markup(bytes: &[u8]) -> String {
    strip_markup(&String::from_utf8_lossy(bytes))
}

/// Remove markup tags and collapse whitespace runs to single spaces.
fn strip_markup(raw: &str) -> String {
    let no_tags = TAG_RE.replace_all(raw, " ");
    WS_RE.replace_all(&no_tags, " ").trim().to_string()
}
