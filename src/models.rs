//! Core data types that flow through the clipping pipeline.

use chrono::NaiveDate;

/// Container format of a downloadable artifact, inferred from its filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// ZIP archive of gazette markup files.
    Zip,
    /// Single PDF document.
    Pdf,
    /// Unwrapped markup file (XML/HTML).
    Markup,
    /// Anything else; skipped by the pipeline without error.
    Unknown,
}

impl ContainerKind {
    /// Infer the container kind from a filename suffix (case-insensitive).
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            ContainerKind::Zip
        } else if lower.ends_with(".pdf") {
            ContainerKind::Pdf
        } else if lower.ends_with(".xml") || lower.ends_with(".html") || lower.ends_with(".htm") {
            ContainerKind::Markup
        } else {
            ContainerKind::Unknown
        }
    }
}

/// One downloadable gazette file for a date/section, as discovered on the
/// portal's catalog page. The filename doubles as the dedupe identifier;
/// the portal keeps it stable across listings of the same underlying file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Stable identifier (the portal filename).
    pub id: String,
    /// Display name.
    pub name: String,
    pub kind: ContainerKind,
}

impl Artifact {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            kind: ContainerKind::from_name(&name),
            name,
        }
    }
}

/// One keyword hit inside one artifact's extracted text. Append-only.
#[derive(Debug, Clone)]
pub struct MatchRow {
    pub run_date: String,
    pub source_file: String,
    /// Name of the filter configuration that produced the hit.
    pub filter_name: String,
    pub keyword: String,
    /// Context window around the hit, clamped and trimmed.
    pub snippet: String,
}

/// Summary of one orchestrator invocation, persisted as one `runs` row.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_date: NaiveDate,
    /// Artifacts listed across all dates/sections of the window.
    pub files_seen: u64,
    /// Artifacts not previously processed that this run attempted.
    pub files_new: u64,
    pub matches_found: u64,
    pub email_sent: bool,
    /// Window descriptor plus error summaries.
    pub notes: String,
}
