//! Public types: citation items, resolved records, entries, jobs and job results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One free-text reference plus its best-effort structured decomposition.
///
/// Produced by a [`crate::extract::CitationExtractor`]. Every field except
/// `raw_text` may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationItem {
    /// The reference exactly as it appeared in the batch.
    pub raw_text: String,
    /// Article title.
    pub title: Option<String>,
    /// First author's surname, cleaned for use in filenames.
    pub first_author: Option<String>,
    /// Journal name.
    pub journal: Option<String>,
    /// Publication year as written.
    pub year: Option<String>,
    /// PubMed identifier quoted in the reference itself, if any.
    pub known_id: Option<String>,
}

impl CitationItem {
    /// Create an item with only the raw text filled in.
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            raw_text: text.into(),
            ..Default::default()
        }
    }

    /// The surname used for filenames, `"Unknown"` when absent.
    pub fn author_or_unknown(&self) -> &str {
        match self.first_author.as_deref() {
            Some(a) if !a.trim().is_empty() => a,
            _ => "Unknown",
        }
    }
}

/// Canonical record returned by a successful match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    /// PubMed identifier (PMID).
    pub id: String,
    /// Article title.
    pub title: String,
    /// Authors as "ForeName LastName".
    pub authors: Vec<String>,
    /// Journal title.
    pub journal: Option<String>,
    /// Publication year.
    pub year: Option<u16>,
    /// DOI, the record's identifier outside PubMed.
    pub doi: Option<String>,
    /// Abstract text.
    pub abstract_text: Option<String>,
}

/// Outcome recorded on an [`Entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Success,
    PubmedSearchFailed,
    Duplicate,
    Error,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PubmedSearchFailed => "pubmed_search_failed",
            Self::Duplicate => "duplicate",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrievable content object associated with a resolved article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Text,
    Pdf,
    References,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [Self::Text, Self::Pdf, Self::References];
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "pdf" => Ok(Self::Pdf),
            "references" | "ref" | "refs" => Ok(Self::References),
            _ => Err(format!("Invalid artifact kind: {}", s)),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Pdf => f.write_str("pdf"),
            Self::References => f.write_str("references"),
        }
    }
}

/// Which artifacts were retrieved for an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFlags {
    pub text: bool,
    pub pdf: bool,
    pub references: bool,
}

impl ArtifactFlags {
    pub fn get(&self, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Text => self.text,
            ArtifactKind::Pdf => self.pdf,
            ArtifactKind::References => self.references,
        }
    }

    pub fn set(&mut self, kind: ArtifactKind, value: bool) {
        match kind {
            ArtifactKind::Text => self.text = value,
            ArtifactKind::Pdf => self.pdf = value,
            ArtifactKind::References => self.references = value,
        }
    }
}

/// One persisted outcome of resolving and enriching a citation item.
///
/// `canonical_id` is present exactly when `status` is [`EntryStatus::Success`];
/// use the constructors to keep it that way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub canonical_id: Option<String>,
    pub derived_filename: Option<String>,
    pub status: EntryStatus,
    pub artifacts: ArtifactFlags,
    pub raw_text: String,
    pub query_title: String,
    pub matched_title: Option<String>,
    pub first_author: String,
    pub journal: Option<String>,
    pub year: Option<u16>,
    pub doi: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    /// Entry for an item that matched `record`.
    pub fn success(
        item: &CitationItem,
        record: &ResolvedRecord,
        filename: String,
        artifacts: ArtifactFlags,
    ) -> Self {
        Self {
            canonical_id: Some(record.id.clone()),
            derived_filename: Some(filename),
            status: EntryStatus::Success,
            artifacts,
            raw_text: item.raw_text.clone(),
            query_title: item.title.clone().unwrap_or_default(),
            matched_title: Some(record.title.clone()),
            first_author: item.author_or_unknown().to_string(),
            journal: record.journal.clone(),
            year: record.year,
            doi: record.doi.clone(),
            created_at: Utc::now(),
        }
    }

    /// Entry for an item no search strategy could match.
    pub fn search_failed(item: &CitationItem) -> Self {
        Self {
            canonical_id: None,
            derived_filename: None,
            status: EntryStatus::PubmedSearchFailed,
            artifacts: ArtifactFlags::default(),
            raw_text: item.raw_text.clone(),
            query_title: item.title.clone().unwrap_or_default(),
            matched_title: None,
            first_author: item.author_or_unknown().to_string(),
            journal: item.journal.clone(),
            year: item.year.as_deref().and_then(|y| y.trim().parse().ok()),
            doi: None,
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled jobs never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One batch-processing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub total_items: u32,
    pub completed_count: u32,
    pub failed_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_text: String,
}

impl Job {
    /// A fresh pending job with a random identifier.
    pub fn new(source_text: impl Into<String>, total_items: u32) -> Self {
        let now = Utc::now();
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            total_items,
            completed_count: 0,
            failed_count: 0,
            created_at: now,
            updated_at: now,
            source_text: source_text.into(),
        }
    }

    /// Items with a recorded outcome.
    pub fn processed_items(&self) -> u32 {
        self.completed_count + self.failed_count
    }

    /// `processed / total * 100`, rounded to one decimal; 0 for an empty job.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        let pct = f64::from(self.processed_items()) / f64::from(self.total_items) * 100.0;
        (pct * 10.0).round() / 10.0
    }
}

/// Partial update applied to a stored [`Job`]. `None` fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub total_items: Option<u32>,
    pub completed_count: Option<u32>,
    pub failed_count: Option<u32>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(completed: u32, failed: u32) -> Self {
        Self {
            completed_count: Some(completed),
            failed_count: Some(failed),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_total(mut self, total: u32) -> Self {
        self.total_items = Some(total);
        self
    }

    /// Apply this update to `job`, bumping `updated_at`.
    pub fn apply_to(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(total) = self.total_items {
            job.total_items = total;
        }
        if let Some(completed) = self.completed_count {
            job.completed_count = completed;
        }
        if let Some(failed) = self.failed_count {
            job.failed_count = failed;
        }
        job.updated_at = Utc::now();
    }
}

/// Per-item outcome within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Success,
    Failed,
    Duplicate,
    Error,
}

impl ItemStatus {
    /// Whether the item counts towards `completed_count`.
    pub fn counts_as_completed(&self) -> bool {
        matches!(self, Self::Success | Self::Duplicate)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failed => f.write_str("failed"),
            Self::Duplicate => f.write_str("duplicate"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// One row per citation item within a job. Never updated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub item_index: u32,
    pub status: ItemStatus,
    pub canonical_id: Option<String>,
    pub query_title: Option<String>,
    pub error_message: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl JobResult {
    pub fn new(job_id: impl Into<String>, item_index: u32, status: ItemStatus) -> Self {
        Self {
            job_id: job_id.into(),
            item_index,
            status,
            canonical_id: None,
            query_title: None,
            error_message: None,
            processed_at: Utc::now(),
        }
    }

    pub fn with_canonical_id(mut self, id: impl Into<String>) -> Self {
        self.canonical_id = Some(id.into());
        self
    }

    pub fn with_query_title(mut self, title: Option<String>) -> Self {
        self.query_title = title;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// A job as reported to callers, with derived progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    #[serde(flatten)]
    pub job: Job,
    pub processed_items: u32,
    pub progress_percentage: f64,
}

impl From<Job> for JobReport {
    fn from(job: Job) -> Self {
        Self {
            processed_items: job.processed_items(),
            progress_percentage: job.progress_percentage(),
            job,
        }
    }
}

/// Aggregate counts over the entry store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryStatistics {
    pub total_entries: usize,
    pub successful: usize,
    pub failed: usize,
    pub text_available: usize,
    pub pdf_available: usize,
    pub references_available: usize,
    pub text_and_pdf: usize,
    pub success_rate: f64,
}

impl EntryStatistics {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> Self {
        let mut stats = Self::default();
        for entry in entries {
            stats.total_entries += 1;
            if entry.status == EntryStatus::Success {
                stats.successful += 1;
            } else {
                stats.failed += 1;
            }
            let a = entry.artifacts;
            stats.text_available += usize::from(a.text);
            stats.pdf_available += usize::from(a.pdf);
            stats.references_available += usize::from(a.references);
            stats.text_and_pdf += usize::from(a.text && a.pdf);
        }
        if stats.total_entries > 0 {
            stats.success_rate = stats.successful as f64 / stats.total_entries as f64;
        }
        stats
    }
}
