//! Background job processing.
//!
//! [`Orchestrator::submit`] persists a pending job and spawns one worker for
//! it. The worker segments the batch once, then resolves and enriches each
//! citation item in order, writing one [`JobResult`] and a progress update per
//! item. [`ActiveJobs`] guarantees at most one worker per job id and holds the
//! per-job cancellation tokens.

use crate::client::PubMedClient;
use crate::config::{Config, RecoveryPolicy};
use crate::content::{ContentFetcher, PmcContentFetcher};
use crate::error::{HarvestError, Result};
use crate::extract::{split_references, CitationExtractor, HeuristicExtractor, LlmExtractor};
use crate::rate_limit::RateLimiter;
use crate::resolver::{ArticleResolver, Resolution};
use crate::store::{FileStore, Store};
use crate::types::{
    ArtifactFlags, ArtifactKind, CitationItem, Entry, EntryStatistics, EntryStatus, ItemStatus,
    Job, JobReport, JobResult, JobStatus, JobUpdate,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Live worker bookkeeping for one job.
#[derive(Debug, Clone)]
struct Slot {
    cancel: CancellationToken,
    /// Fired when the worker releases the job.
    finished: CancellationToken,
}

/// Job ids that currently have a live worker, each with its cancellation token.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobs {
    inner: Arc<Mutex<HashMap<String, Slot>>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `job_id` and hand out its token, or `None` if it is already active.
    pub fn try_claim(&self, job_id: &str) -> Option<CancellationToken> {
        let mut jobs = self.lock();
        if jobs.contains_key(job_id) {
            return None;
        }
        let slot = Slot {
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        };
        let token = slot.cancel.clone();
        jobs.insert(job_id.to_string(), slot);
        Some(token)
    }

    /// Remove `job_id` and wake everyone waiting for it.
    pub fn release(&self, job_id: &str) -> bool {
        match self.lock().remove(job_id) {
            Some(slot) => {
                slot.finished.cancel();
                true
            }
            None => false,
        }
    }

    pub fn token(&self, job_id: &str) -> Option<CancellationToken> {
        self.lock().get(job_id).map(|slot| slot.cancel.clone())
    }

    /// A token that fires once the current worker for `job_id` is released.
    pub fn finished(&self, job_id: &str) -> Option<CancellationToken> {
        self.lock().get(job_id).map(|slot| slot.finished.clone())
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().contains_key(job_id)
    }

    /// Active ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Tunables for the worker loop and listings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Pause between two items of the same job.
    pub item_pause: Duration,
    /// Upper bound for [`Orchestrator::list_jobs`].
    pub recent_limit: usize,
    pub recovery: RecoveryPolicy,
    /// Pass the first author to the resolver as a search filter.
    pub use_author_filter: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            item_pause: Duration::from_millis(100),
            recent_limit: 20,
            recovery: RecoveryPolicy::Resume,
            use_author_filter: false,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            item_pause: config.jobs.item_pause(),
            recent_limit: config.jobs.recent_limit,
            recovery: config.jobs.recovery,
            use_author_filter: config.matching.use_author_filter,
        }
    }
}

/// External collaborators the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub extractor: Arc<dyn CitationExtractor>,
    pub resolver: ArticleResolver,
    pub content: Arc<dyn ContentFetcher>,
}

/// Returned by [`Orchestrator::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedJob {
    pub job_id: String,
    pub total_items: u32,
}

/// What [`Orchestrator::cancel`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The live worker was asked to stop at the next item boundary.
    Signalled,
    /// No worker was running; the job was marked cancelled directly.
    MarkedCancelled,
    /// The job had already finished with this status.
    AlreadyTerminal(JobStatus),
}

/// Jobs touched by [`Orchestrator::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub resumed: Vec<String>,
    pub failed: Vec<String>,
}

struct Shared {
    store: Arc<dyn Store>,
    extractor: Arc<dyn CitationExtractor>,
    resolver: ArticleResolver,
    content: Arc<dyn ContentFetcher>,
    active: ActiveJobs,
    settings: OrchestratorSettings,
}

/// Owns the active-job set and spawns one worker per job.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, settings: OrchestratorSettings) -> Self {
        Self::with_active_jobs(collaborators, settings, ActiveJobs::new())
    }

    pub fn with_active_jobs(
        collaborators: Collaborators,
        settings: OrchestratorSettings,
        active: ActiveJobs,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store: collaborators.store,
                extractor: collaborators.extractor,
                resolver: collaborators.resolver,
                content: collaborators.content,
                active,
                settings,
            }),
        }
    }

    /// Wire up the PubMed-backed stack described by `config`.
    ///
    /// Search, fetch and PMC retrieval share one NCBI rate limiter. Without an
    /// OpenAI key, references are decomposed with local heuristics.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let client = PubMedClient::from_config(&config.pubmed)?;
        let limiter = RateLimiter::new(config.pubmed.min_interval());

        let resolver = ArticleResolver::new(Arc::new(client.clone()), limiter.clone())
            .with_max_results(config.pubmed.search_max_results)
            .with_threshold(config.matching.threshold);
        let content = PmcContentFetcher::new(client, limiter, &config.storage.corpus_dir);
        let store = FileStore::open(&config.storage.data_dir).await?;

        let extractor: Arc<dyn CitationExtractor> = if config.llm.api_key.is_some() {
            Arc::new(LlmExtractor::new(config.llm.clone())?)
        } else {
            warn!("OPENAI_API_KEY not set, using heuristic citation extraction");
            Arc::new(HeuristicExtractor)
        };

        Ok(Self::new(
            Collaborators {
                store: Arc::new(store),
                extractor,
                resolver,
                content: Arc::new(content),
            },
            OrchestratorSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.shared.settings
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.shared.store
    }

    /// Create a pending job for `raw_text` and start processing it in the background.
    ///
    /// The item count comes from a local pre-split; blank or unsplittable
    /// text fails with [`HarvestError::InvalidInput`] and creates no job.
    pub async fn submit(&self, raw_text: &str) -> Result<SubmittedJob> {
        if raw_text.trim().is_empty() {
            return Err(HarvestError::InvalidInput(
                "Citation text is empty".to_string(),
            ));
        }
        let count = split_references(raw_text).len();
        if count == 0 {
            return Err(HarvestError::InvalidInput(
                "No citations found in text".to_string(),
            ));
        }
        let total_items = u32::try_from(count)
            .map_err(|_| HarvestError::InvalidInput(format!("Too many citations: {}", count)))?;

        let job = Job::new(raw_text, total_items);
        self.shared.store.create_job(&job).await?;
        info!(job_id = %job.job_id, total_items, "Job created");

        self.start_worker(&job.job_id);
        Ok(SubmittedJob {
            job_id: job.job_id,
            total_items,
        })
    }

    /// Spawn a worker for `job_id` unless one is already running.
    ///
    /// Returns whether a worker was started. The worker runs under a
    /// supervisor task that marks the job failed if it errors or panics and
    /// always removes it from the active set.
    pub fn start_worker(&self, job_id: &str) -> bool {
        let Some(token) = self.shared.active.try_claim(job_id) else {
            info!(job_id, "Job already has a worker");
            return false;
        };

        let job_id = job_id.to_string();
        let span = info_span!("job", job_id = %job_id);
        let this = self.clone();

        tokio::spawn(
            async move {
                let worker = {
                    let this = this.clone();
                    let job_id = job_id.clone();
                    tokio::spawn(
                        async move { this.run_job(&job_id, token).await }.in_current_span(),
                    )
                };

                match worker.await {
                    Ok(Ok(status)) => debug!(%status, "Worker finished"),
                    Ok(Err(e)) => {
                        error!(error = %e, "Job failed");
                        this.mark_failed(&job_id).await;
                    }
                    Err(e) => {
                        error!(error = %e, "Worker task aborted");
                        this.mark_failed(&job_id).await;
                    }
                }
                this.shared.active.release(&job_id);
            }
            .instrument(span),
        );
        true
    }

    async fn mark_failed(&self, job_id: &str) {
        let update = JobUpdate::status(JobStatus::Failed);
        match self.shared.store.update_job_progress(job_id, update).await {
            Ok(_) => {}
            Err(e) if e.finished_status().is_some() => {
                debug!(job_id, error = %e, "Job already finished, leaving it")
            }
            Err(e) => error!(job_id, error = %e, "Could not mark job failed"),
        }
    }

    /// Write `update`. Returns the status of the job instead when it was
    /// already finished by someone else, typically a cancel.
    async fn advance(&self, job_id: &str, update: JobUpdate) -> Result<Option<JobStatus>> {
        match self.shared.store.update_job_progress(job_id, update).await {
            Ok(_) => Ok(None),
            Err(e) => match e.finished_status() {
                Some(status) => {
                    info!(%status, "Job finished outside this worker, stopping");
                    Ok(Some(status))
                }
                None => Err(e),
            },
        }
    }

    /// The worker body. Returns the terminal status the job ended with.
    async fn run_job(&self, job_id: &str, token: CancellationToken) -> Result<JobStatus> {
        let store = &self.shared.store;
        let job = store
            .get_job(job_id)
            .await?
            .ok_or_else(|| HarvestError::NotFound(format!("Job {}", job_id)))?;
        if job.status.is_terminal() {
            info!(status = %job.status, "Job already finished");
            return Ok(job.status);
        }

        if let Some(status) = self
            .advance(job_id, JobUpdate::status(JobStatus::Processing))
            .await?
        {
            return Ok(status);
        }

        let items = match self.shared.extractor.segment(&job.source_text).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Citation extraction failed");
                let result = JobResult::new(job_id, 0, ItemStatus::Error)
                    .with_error(format!("Citation extraction failed: {}", e));
                if let Err(e) = store.append_job_result(&result).await {
                    error!(error = %e, "Could not record extraction failure");
                }
                let stopped = self
                    .advance(job_id, JobUpdate::status(JobStatus::Failed))
                    .await?;
                return Ok(stopped.unwrap_or(JobStatus::Failed));
            }
        };

        let total = u32::try_from(items.len())
            .map_err(|_| HarvestError::Internal(format!("Too many items: {}", items.len())))?;

        // Results already on record when resuming after a restart.
        let existing: BTreeMap<u32, ItemStatus> = store
            .list_job_results(job_id)
            .await?
            .into_iter()
            .filter(|r| r.item_index < total)
            .map(|r| (r.item_index, r.status))
            .collect();
        let mut completed = existing.values().filter(|s| s.counts_as_completed()).count() as u32;
        let mut failed = existing.len() as u32 - completed;

        if let Some(status) = self
            .advance(job_id, JobUpdate::progress(completed, failed).with_total(total))
            .await?
        {
            return Ok(status);
        }
        info!(total, resumed = existing.len(), "Processing citations");

        let pending: Vec<(u32, &CitationItem)> = (0..total)
            .zip(items.iter())
            .filter(|(index, _)| !existing.contains_key(index))
            .collect();

        for (position, (index, item)) in pending.iter().enumerate() {
            if token.is_cancelled() {
                info!(item_index = index, "Cancellation observed, stopping");
                break;
            }

            let result = self
                .process_item(job_id, *index, item)
                .await
                .unwrap_or_else(|e| {
                    error!(item_index = index, error = %e, "Item processing failed");
                    JobResult::new(job_id, *index, ItemStatus::Error)
                        .with_query_title(item.title.clone())
                        .with_error(e.to_string())
                });

            match store.append_job_result(&result).await {
                Ok(true) if result.status.counts_as_completed() => completed += 1,
                Ok(true) => failed += 1,
                Ok(false) => {
                    debug!(item_index = index, "Result already recorded");
                    continue;
                }
                Err(e) => {
                    error!(item_index = index, error = %e, "Could not record job result");
                    failed += 1;
                }
            }

            match self
                .advance(job_id, JobUpdate::progress(completed, failed))
                .await
            {
                Ok(None) => {}
                Ok(Some(status)) => return Ok(status),
                Err(e) => error!(error = %e, "Could not record job progress"),
            }

            let pause = self.shared.settings.item_pause;
            if position + 1 < pending.len() && !pause.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = token.cancelled() => {}
                }
            }
        }

        let status = if completed > 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        if let Some(stopped) = self
            .advance(job_id, JobUpdate::progress(completed, failed).with_status(status))
            .await?
        {
            return Ok(stopped);
        }
        info!(%status, completed, failed, "Job finished");
        Ok(status)
    }

    /// Resolve, enrich and persist one item.
    async fn process_item(&self, job_id: &str, index: u32, item: &CitationItem) -> Result<JobResult> {
        let store = &self.shared.store;
        let query_title = item.title.clone();

        if let Some(known) = item.known_id.as_deref() {
            if store.entry_exists_by_canonical_id(known).await? {
                info!(item_index = index, pmid = known, "Cited PMID already stored");
                return Ok(JobResult::new(job_id, index, ItemStatus::Duplicate)
                    .with_canonical_id(known)
                    .with_query_title(query_title));
            }
        }

        let Some(title) = item.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            store.append_entry(&Entry::search_failed(item)).await?;
            return Ok(JobResult::new(job_id, index, ItemStatus::Failed)
                .with_error("No title could be extracted"));
        };

        let author = if self.shared.settings.use_author_filter {
            item.first_author.as_deref().filter(|a| *a != "Unknown")
        } else {
            None
        };

        let record = match self.shared.resolver.resolve(title, author).await {
            Resolution::Matched { record, .. } => record,
            Resolution::NotFound => {
                store.append_entry(&Entry::search_failed(item)).await?;
                return Ok(JobResult::new(job_id, index, ItemStatus::Failed)
                    .with_query_title(query_title)
                    .with_error(format!("PubMed search failed for: {}", title)));
            }
        };

        let duplicate = || {
            JobResult::new(job_id, index, ItemStatus::Duplicate)
                .with_canonical_id(&record.id)
                .with_query_title(query_title.clone())
        };
        if store.entry_exists_by_canonical_id(&record.id).await? {
            info!(item_index = index, pmid = %record.id, "Resolved PMID already stored");
            return Ok(duplicate());
        }

        let filename = format!("{}_{}", item.author_or_unknown(), record.id);
        let mut artifacts = ArtifactFlags::default();
        for kind in ArtifactKind::ALL {
            let found = self.shared.content.fetch(kind, &record.id, &filename).await;
            artifacts.set(kind, found);
        }

        let entry = Entry::success(item, &record, filename, artifacts);
        match store.append_entry(&entry).await {
            Ok(()) => {}
            Err(HarvestError::DuplicateIdentifier(_)) => return Ok(duplicate()),
            Err(e) => return Err(e),
        }

        Ok(JobResult::new(job_id, index, ItemStatus::Success)
            .with_canonical_id(&record.id)
            .with_query_title(query_title.clone()))
    }

    /// Current state of a job with its derived progress.
    pub async fn get_job(&self, job_id: &str) -> Result<JobReport> {
        self.shared
            .store
            .get_job(job_id)
            .await?
            .map(JobReport::from)
            .ok_or_else(|| HarvestError::NotFound(format!("Job {}", job_id)))
    }

    /// Results for a job, sorted by item index.
    pub async fn list_job_results(&self, job_id: &str) -> Result<Vec<JobResult>> {
        if self.shared.store.get_job(job_id).await?.is_none() {
            return Err(HarvestError::NotFound(format!("Job {}", job_id)));
        }
        self.shared.store.list_job_results(job_id).await
    }

    /// Most recent jobs first, never more than the configured bound.
    pub async fn list_jobs(&self, limit: Option<usize>) -> Result<Vec<JobReport>> {
        let bound = self.shared.settings.recent_limit;
        let limit = limit.map_or(bound, |l| l.min(bound));
        let jobs = self.shared.store.list_jobs(limit).await?;
        Ok(jobs.into_iter().map(JobReport::from).collect())
    }

    /// Ids of jobs that currently have a worker.
    pub fn active_jobs(&self) -> Vec<String> {
        self.shared.active.ids()
    }

    /// Request cancellation. A running worker stops at its next item boundary.
    pub async fn cancel(&self, job_id: &str) -> Result<CancelOutcome> {
        let job = self
            .shared
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| HarvestError::NotFound(format!("Job {}", job_id)))?;

        if job.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(job.status));
        }

        if let Some(token) = self.shared.active.token(job_id) {
            token.cancel();
            info!(job_id, "Cancellation requested");
            return Ok(CancelOutcome::Signalled);
        }

        // The store refuses the write if the job finished since the read above.
        match self
            .shared
            .store
            .update_job_progress(job_id, JobUpdate::status(JobStatus::Cancelled))
            .await
        {
            Ok(_) => {
                info!(job_id, "Job without worker marked cancelled");
                Ok(CancelOutcome::MarkedCancelled)
            }
            Err(e) => match e.finished_status() {
                Some(status) => Ok(CancelOutcome::AlreadyTerminal(status)),
                None => Err(e),
            },
        }
    }

    /// Wait until `job_id` has no worker, then report it.
    pub async fn wait(&self, job_id: &str) -> Result<JobReport> {
        if let Some(finished) = self.shared.active.finished(job_id) {
            finished.cancelled().await;
        }
        self.get_job(job_id).await
    }

    /// Apply the recovery policy to jobs left pending or processing by a
    /// previous run.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let jobs = self.shared.store.list_jobs(usize::MAX).await?;

        for job in jobs.into_iter().rev() {
            if job.status.is_terminal() || self.shared.active.contains(&job.job_id) {
                continue;
            }
            match self.shared.settings.recovery {
                RecoveryPolicy::Resume => {
                    if self.start_worker(&job.job_id) {
                        info!(job_id = %job.job_id, "Resuming unfinished job");
                        report.resumed.push(job.job_id);
                    }
                }
                RecoveryPolicy::Fail => {
                    let update = JobUpdate::status(JobStatus::Failed);
                    match self.shared.store.update_job_progress(&job.job_id, update).await {
                        Ok(_) => {}
                        Err(e) if e.finished_status().is_some() => continue,
                        Err(e) => return Err(e),
                    }
                    info!(job_id = %job.job_id, "Marked unfinished job failed");
                    report.failed.push(job.job_id);
                }
            }
        }
        Ok(report)
    }

    /// Fetch reference lists for successful entries that lack one.
    /// Returns how many were retrieved.
    pub async fn backfill_reference_lists(&self) -> Result<usize> {
        let store = &self.shared.store;
        let mut fetched = 0;

        for entry in store.list_entries().await? {
            if entry.status != EntryStatus::Success || entry.artifacts.references {
                continue;
            }
            let (Some(id), Some(filename)) = (&entry.canonical_id, &entry.derived_filename) else {
                continue;
            };
            if self.shared.content.fetch_reference_list(id, filename).await {
                store
                    .update_entry_artifact_flag(id, ArtifactKind::References, true)
                    .await?;
                fetched += 1;
            }
        }

        info!(fetched, "Reference list backfill finished");
        Ok(fetched)
    }

    /// Run a single resolution outside any job.
    pub async fn resolve_title(&self, title: &str, author: Option<&str>) -> Result<Resolution> {
        if title.trim().is_empty() {
            return Err(HarvestError::InvalidInput("Title is empty".to_string()));
        }
        Ok(self.shared.resolver.resolve(title, author).await)
    }

    pub async fn list_entries(&self) -> Result<Vec<Entry>> {
        self.shared.store.list_entries().await
    }

    pub async fn search_entries(&self, query: &str) -> Result<Vec<Entry>> {
        self.shared.store.search_entries(query).await
    }

    /// The stored entry for a PMID.
    pub async fn get_entry(&self, pmid: &str) -> Result<Entry> {
        self.shared
            .store
            .get_entry(pmid.trim())
            .await?
            .ok_or_else(|| HarvestError::NotFound(format!("Entry {}", pmid)))
    }

    /// Entries whose search or retrieval did not succeed, oldest first.
    pub async fn failed_entries(&self) -> Result<Vec<Entry>> {
        let entries = self.shared.store.list_entries().await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.status != EntryStatus::Success)
            .collect())
    }

    /// Contents of a stored artifact for a PMID.
    ///
    /// Fails with [`HarvestError::NotFound`] when the entry is unknown or the
    /// artifact was never retrieved.
    pub async fn read_artifact(&self, pmid: &str, kind: ArtifactKind) -> Result<Vec<u8>> {
        let entry = self.get_entry(pmid).await?;
        if !entry.artifacts.get(kind) {
            return Err(HarvestError::NotFound(format!(
                "No {} artifact for {}",
                kind, pmid
            )));
        }
        let filename = entry.derived_filename.as_deref().ok_or_else(|| {
            HarvestError::Internal(format!("Entry {} has no file name", pmid))
        })?;
        self.shared.content.load(kind, filename).await
    }

    pub async fn entry_statistics(&self) -> Result<EntryStatistics> {
        self.shared.store.entry_statistics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_jobs_claim_is_exclusive() {
        let active = ActiveJobs::new();
        let token = active.try_claim("a").unwrap();
        assert!(active.try_claim("a").is_none());
        assert!(active.try_claim("b").is_some());
        assert_eq!(active.ids(), vec!["a".to_string(), "b".to_string()]);

        active.token("a").unwrap().cancel();
        assert!(token.is_cancelled());
        assert!(!active.token("b").unwrap().is_cancelled());

        assert!(active.release("a"));
        assert!(!active.release("a"));
        assert!(active.try_claim("a").is_some());
        assert_eq!(active.len(), 2);
    }

    #[tokio::test]
    async fn test_release_fires_finished_token() {
        let active = ActiveJobs::new();
        assert!(active.finished("a").is_none());
        active.try_claim("a").unwrap();
        let finished = active.finished("a").unwrap();
        assert!(!finished.is_cancelled());

        let waiter = tokio::spawn(async move { finished.cancelled().await });
        active.release("a");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // a fresh claim gets a fresh token
        active.try_claim("a").unwrap();
        assert!(!active.finished("a").unwrap().is_cancelled());
    }

    #[test]
    fn test_clones_share_the_set() {
        let active = ActiveJobs::new();
        let clone = active.clone();
        clone.try_claim("x");
        assert!(active.contains("x"));
        assert!(!active.is_empty());
    }

    #[test]
    fn test_cancel_outcome_json() {
        let json = serde_json::to_value(CancelOutcome::AlreadyTerminal(JobStatus::Completed)).unwrap();
        assert_eq!(json["outcome"], "already_terminal");
        assert_eq!(json["status"], "completed");
        let json = serde_json::to_value(CancelOutcome::Signalled).unwrap();
        assert_eq!(json["outcome"], "signalled");
    }
}
