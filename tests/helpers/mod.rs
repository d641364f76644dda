//! Mock collaborators for driving the orchestrator without network access.

#![allow(dead_code)]

use async_trait::async_trait;
use refharvest::content::ContentFetcher;
use refharvest::error::{HarvestError, Result};
use refharvest::extract::CitationExtractor;
use refharvest::orchestrator::{Collaborators, OrchestratorSettings};
use refharvest::rate_limit::RateLimiter;
use refharvest::search::{ArticleSource, Lookup};
use refharvest::store::{MemoryStore, Store};
use refharvest::{
    ArticleResolver, ArtifactKind, CitationItem, Entry, EntryStatistics, Job, JobResult,
    JobUpdate, Orchestrator, ResolvedRecord,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};

pub fn item(title: &str, author: &str) -> CitationItem {
    CitationItem {
        raw_text: format!("{} A. {}. J Test. 2020.", author, title),
        title: Some(title.to_string()),
        first_author: Some(author.to_string()),
        journal: Some("J Test".to_string()),
        year: Some("2020".to_string()),
        known_id: None,
    }
}

/// Numbered reference text with one line per item, so the submit-time
/// pre-count agrees with what the extractor returns.
pub fn numbered(items: &[CitationItem]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, it)| format!("{}. {}", i + 1, it.raw_text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Returns those of its items whose text appears in the submitted batch, or
/// fails every time.
pub struct StaticExtractor {
    items: Option<Vec<CitationItem>>,
}

impl StaticExtractor {
    pub fn new(items: Vec<CitationItem>) -> Self {
        Self { items: Some(items) }
    }

    pub fn failing() -> Self {
        Self { items: None }
    }
}

#[async_trait]
impl CitationExtractor for StaticExtractor {
    async fn segment(&self, raw_text: &str) -> Result<Vec<CitationItem>> {
        let items = self
            .items
            .as_ref()
            .ok_or_else(|| HarvestError::Extraction("model unavailable".to_string()))?;
        Ok(items
            .iter()
            .filter(|it| raw_text.contains(&it.raw_text))
            .cloned()
            .collect())
    }
}

/// Knows a fixed set of articles and finds one when the query mentions its title.
#[derive(Default)]
pub struct CatalogSource {
    records: HashMap<String, ResolvedRecord>,
    pub searches: AtomicUsize,
}

impl CatalogSource {
    pub fn with(entries: &[(&str, &str)]) -> Self {
        let records = entries
            .iter()
            .map(|(id, title)| {
                let record = ResolvedRecord {
                    id: id.to_string(),
                    title: title.to_string(),
                    authors: vec!["Ann Author".to_string()],
                    journal: Some("J Test".to_string()),
                    year: Some(2020),
                    doi: Some(format!("10.1000/{}", id)),
                    abstract_text: None,
                };
                (id.to_string(), record)
            })
            .collect();
        Self {
            records,
            searches: AtomicUsize::new(0),
        }
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArticleSource for CatalogSource {
    async fn search(&self, query: &str, _max_results: u32) -> Lookup<Vec<String>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let query = query.to_lowercase();
        let mut ids: Vec<String> = self
            .records
            .values()
            .filter(|r| query.contains(&r.title.to_lowercase()))
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        if ids.is_empty() {
            Lookup::NotFound
        } else {
            Lookup::Found(ids)
        }
    }

    async fn fetch_details(&self, id: &str) -> Lookup<ResolvedRecord> {
        match self.records.get(id) {
            Some(record) => Lookup::Found(record.clone()),
            None => Lookup::NotFound,
        }
    }
}

/// Reports fixed availability per artifact kind and counts calls.
pub struct FixedContent {
    pub text: bool,
    pub pdf: bool,
    pub references: bool,
    pub text_calls: AtomicUsize,
    pub reference_calls: AtomicUsize,
    gate: Option<Gate>,
}

/// Makes `fetch_text` announce itself and wait for a permit.
struct Gate {
    started: mpsc::UnboundedSender<String>,
    proceed: Arc<Semaphore>,
}

impl FixedContent {
    pub fn new(text: bool, pdf: bool, references: bool) -> Self {
        Self {
            text,
            pdf,
            references,
            text_calls: AtomicUsize::new(0),
            reference_calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Content that blocks each item in `fetch_text` until a permit is
    /// added to `proceed`. Each item consumes one permit.
    pub fn gated() -> (Self, mpsc::UnboundedReceiver<String>, Arc<Semaphore>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let proceed = Arc::new(Semaphore::new(0));
        let mut content = Self::new(true, true, true);
        content.gate = Some(Gate {
            started: tx,
            proceed: proceed.clone(),
        });
        (content, rx, proceed)
    }
}

#[async_trait]
impl ContentFetcher for FixedContent {
    async fn fetch_text(&self, canonical_id: &str, _filename: &str) -> bool {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.started.send(canonical_id.to_string());
            if let Ok(permit) = gate.proceed.acquire().await {
                permit.forget();
            }
        }
        self.text
    }

    async fn fetch_pdf(&self, _canonical_id: &str, _filename: &str) -> bool {
        self.pdf
    }

    async fn fetch_reference_list(&self, _canonical_id: &str, _filename: &str) -> bool {
        self.reference_calls.fetch_add(1, Ordering::SeqCst);
        self.references
    }

    async fn load(&self, kind: ArtifactKind, filename: &str) -> Result<Vec<u8>> {
        Ok(format!("{} of {}", kind, filename).into_bytes())
    }
}

/// Delegates to another store. Once armed, the next `get_job` reads its
/// snapshot, fires `reached` and then holds the snapshot until a permit is
/// added to `hold`.
pub struct PausingStore {
    inner: Arc<dyn Store>,
    armed: AtomicBool,
    pub reached: Arc<Notify>,
    pub hold: Arc<Semaphore>,
}

impl PausingStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
            reached: Arc::new(Notify::new()),
            hold: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn pause_next_read(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for PausingStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        self.inner.create_job(job).await
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let snapshot = self.inner.get_job(job_id).await;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            if let Ok(permit) = self.hold.acquire().await {
                permit.forget();
            }
        }
        snapshot
    }

    async fn update_job_progress(&self, job_id: &str, update: JobUpdate) -> Result<Job> {
        self.inner.update_job_progress(job_id, update).await
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.inner.list_jobs(limit).await
    }

    async fn append_job_result(&self, result: &JobResult) -> Result<bool> {
        self.inner.append_job_result(result).await
    }

    async fn list_job_results(&self, job_id: &str) -> Result<Vec<JobResult>> {
        self.inner.list_job_results(job_id).await
    }

    async fn entry_exists_by_canonical_id(&self, canonical_id: &str) -> Result<bool> {
        self.inner.entry_exists_by_canonical_id(canonical_id).await
    }

    async fn get_entry(&self, canonical_id: &str) -> Result<Option<Entry>> {
        self.inner.get_entry(canonical_id).await
    }

    async fn append_entry(&self, entry: &Entry) -> Result<()> {
        self.inner.append_entry(entry).await
    }

    async fn update_entry_artifact_flag(
        &self,
        canonical_id: &str,
        kind: ArtifactKind,
        available: bool,
    ) -> Result<()> {
        self.inner
            .update_entry_artifact_flag(canonical_id, kind, available)
            .await
    }

    async fn list_entries(&self) -> Result<Vec<Entry>> {
        self.inner.list_entries().await
    }

    async fn search_entries(&self, query: &str) -> Result<Vec<Entry>> {
        self.inner.search_entries(query).await
    }

    async fn entry_statistics(&self) -> Result<EntryStatistics> {
        self.inner.entry_statistics().await
    }
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        item_pause: Duration::ZERO,
        ..Default::default()
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<dyn Store>,
    pub source: Arc<CatalogSource>,
    pub content: Arc<FixedContent>,
}

pub fn harness(
    extractor: StaticExtractor,
    source: CatalogSource,
    content: FixedContent,
    store: Arc<dyn Store>,
    settings: OrchestratorSettings,
) -> Harness {
    let source = Arc::new(source);
    let content = Arc::new(content);
    let resolver = ArticleResolver::new(source.clone(), RateLimiter::new(Duration::ZERO));
    let orchestrator = Orchestrator::new(
        Collaborators {
            store: store.clone(),
            extractor: Arc::new(extractor),
            resolver,
            content: content.clone(),
        },
        settings,
    );
    Harness {
        orchestrator,
        store,
        source,
        content,
    }
}

pub fn memory_harness(items: Vec<CitationItem>, source: CatalogSource) -> Harness {
    harness(
        StaticExtractor::new(items),
        source,
        FixedContent::new(true, false, true),
        Arc::new(MemoryStore::new()),
        settings(),
    )
}
