//! Durable record of jobs, per-item job results and resolved entries.
//!
//! The orchestrator depends only on atomic append and point lookup; the
//! on-disk layout is private to [`FileStore`].

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::{HarvestError, Result};
use crate::types::{ArtifactKind, Entry, EntryStatistics, Job, JobResult, JobUpdate};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a new job. Fails if the id is already taken.
    async fn create_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    /// Apply `update` and return the job as stored afterwards.
    ///
    /// A job that is already completed, failed or cancelled is left untouched
    /// and the call fails with [`HarvestError::JobFinished`].
    async fn update_job_progress(&self, job_id: &str, update: JobUpdate) -> Result<Job>;

    /// Up to `limit` jobs, most recently created first.
    async fn list_jobs(&self, limit: usize) -> Result<Vec<Job>>;

    /// Append one result row. Returns `false`, writing nothing, when the job
    /// already has a result at that index.
    async fn append_job_result(&self, result: &JobResult) -> Result<bool>;

    /// Results for a job, sorted by item index.
    async fn list_job_results(&self, job_id: &str) -> Result<Vec<JobResult>>;

    async fn entry_exists_by_canonical_id(&self, canonical_id: &str) -> Result<bool>;

    async fn get_entry(&self, canonical_id: &str) -> Result<Option<Entry>>;

    /// Append an entry. An entry whose canonical id is already stored is
    /// rejected with [`HarvestError::DuplicateIdentifier`].
    async fn append_entry(&self, entry: &Entry) -> Result<()>;

    async fn update_entry_artifact_flag(
        &self,
        canonical_id: &str,
        kind: ArtifactKind,
        available: bool,
    ) -> Result<()>;

    async fn list_entries(&self) -> Result<Vec<Entry>>;

    /// Entries whose titles, first author or canonical id contain `query`,
    /// ignoring case. An empty query matches everything.
    async fn search_entries(&self, query: &str) -> Result<Vec<Entry>>;

    async fn entry_statistics(&self) -> Result<EntryStatistics>;
}

/// In-memory index shared by both store implementations.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    jobs: HashMap<String, Job>,
    /// Job ids in creation order.
    job_order: Vec<String>,
    results: HashMap<String, BTreeMap<u32, JobResult>>,
    entries: Vec<Entry>,
    /// Canonical id → position in `entries`.
    entry_index: HashMap<String, usize>,
}

impl StoreState {
    pub(crate) fn check_new_job(&self, job: &Job) -> Result<()> {
        if self.jobs.contains_key(&job.job_id) {
            return Err(HarvestError::Store(format!("Job {} already exists", job.job_id)));
        }
        Ok(())
    }

    /// Insert or replace a job snapshot.
    pub(crate) fn put_job(&mut self, job: Job) {
        if !self.jobs.contains_key(&job.job_id) {
            self.job_order.push(job.job_id.clone());
        }
        self.jobs.insert(job.job_id.clone(), job);
    }

    pub(crate) fn job(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    pub(crate) fn job_mut(&mut self, job_id: &str) -> Option<&mut Job> {
        self.jobs.get_mut(job_id)
    }

    /// The job as it would look after `update`, without storing it.
    /// Terminal jobs refuse every update.
    pub(crate) fn updated_job(&self, job_id: &str, update: &JobUpdate) -> Result<Job> {
        let mut job = self
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| HarvestError::NotFound(format!("Job {}", job_id)))?;
        if job.status.is_terminal() {
            return Err(HarvestError::JobFinished {
                job_id: job.job_id,
                status: job.status,
            });
        }
        update.apply_to(&mut job);
        Ok(job)
    }

    pub(crate) fn recent_jobs(&self, limit: usize) -> Vec<Job> {
        self.job_order
            .iter()
            .rev()
            .filter_map(|id| self.jobs.get(id))
            .take(limit)
            .cloned()
            .collect()
    }

    pub(crate) fn has_result(&self, job_id: &str, item_index: u32) -> bool {
        self.results
            .get(job_id)
            .is_some_and(|r| r.contains_key(&item_index))
    }

    /// Returns `false` if a result already occupies that index.
    pub(crate) fn insert_result(&mut self, result: JobResult) -> bool {
        let rows = self.results.entry(result.job_id.clone()).or_default();
        if rows.contains_key(&result.item_index) {
            return false;
        }
        rows.insert(result.item_index, result);
        true
    }

    pub(crate) fn results(&self, job_id: &str) -> Vec<JobResult> {
        self.results
            .get(job_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn has_entry(&self, canonical_id: &str) -> bool {
        self.entry_index.contains_key(canonical_id)
    }

    pub(crate) fn entry(&self, canonical_id: &str) -> Option<&Entry> {
        self.entry_index
            .get(canonical_id)
            .and_then(|&i| self.entries.get(i))
    }

    pub(crate) fn check_new_entry(&self, entry: &Entry) -> Result<()> {
        match &entry.canonical_id {
            Some(id) if self.has_entry(id) => Err(HarvestError::DuplicateIdentifier(id.clone())),
            _ => Ok(()),
        }
    }

    pub(crate) fn insert_entry(&mut self, entry: Entry) -> Result<()> {
        self.check_new_entry(&entry)?;
        if let Some(id) = &entry.canonical_id {
            self.entry_index.insert(id.clone(), self.entries.len());
        }
        self.entries.push(entry);
        Ok(())
    }

    pub(crate) fn check_entry_exists(&self, canonical_id: &str) -> Result<()> {
        if self.has_entry(canonical_id) {
            Ok(())
        } else {
            Err(HarvestError::NotFound(format!("Entry {}", canonical_id)))
        }
    }

    pub(crate) fn set_flag(
        &mut self,
        canonical_id: &str,
        kind: ArtifactKind,
        available: bool,
    ) -> Result<()> {
        let index = *self
            .entry_index
            .get(canonical_id)
            .ok_or_else(|| HarvestError::NotFound(format!("Entry {}", canonical_id)))?;
        if let Some(entry) = self.entries.get_mut(index) {
            entry.artifacts.set(kind, available);
        }
        Ok(())
    }

    pub(crate) fn entries(&self) -> Vec<Entry> {
        self.entries.clone()
    }

    pub(crate) fn search(&self, query: &str) -> Vec<Entry> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.entries();
        }
        let hit = |field: Option<&str>| field.is_some_and(|f| f.to_lowercase().contains(&query));
        self.entries
            .iter()
            .filter(|e| {
                hit(Some(&e.query_title))
                    || hit(e.matched_title.as_deref())
                    || hit(Some(&e.first_author))
                    || hit(e.canonical_id.as_deref())
            })
            .cloned()
            .collect()
    }

    pub(crate) fn statistics(&self) -> EntryStatistics {
        EntryStatistics::from_entries(&self.entries)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{ArtifactFlags, CitationItem, ItemStatus, JobStatus, ResolvedRecord};

    pub(crate) fn success_entry(id: &str, title: &str, author: &str) -> Entry {
        let item = CitationItem {
            raw_text: format!("{} X. {}. 2020.", author, title),
            title: Some(title.to_string()),
            first_author: Some(author.to_string()),
            ..Default::default()
        };
        let record = ResolvedRecord {
            id: id.to_string(),
            title: title.to_string(),
            authors: vec![],
            journal: None,
            year: Some(2020),
            doi: None,
            abstract_text: None,
        };
        Entry::success(
            &item,
            &record,
            format!("{}_{}", author, id),
            ArtifactFlags::default(),
        )
    }

    /// Behaviour every [`Store`] implementation must share.
    pub(crate) async fn exercise_store(store: &dyn Store) {
        let first = Job::new("1. A. B.", 2);
        let second = Job::new("1. C. D.", 1);
        store.create_job(&first).await.unwrap();
        store.create_job(&second).await.unwrap();
        assert!(store.create_job(&first).await.is_err());

        let listed = store.list_jobs(10).await.unwrap();
        assert_eq!(listed[0].job_id, second.job_id);
        assert_eq!(listed[1].job_id, first.job_id);
        assert_eq!(store.list_jobs(1).await.unwrap().len(), 1);

        let job = store
            .update_job_progress(
                &first.job_id,
                JobUpdate::progress(1, 0).with_status(JobStatus::Processing),
            )
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.completed_count, 1);
        assert!(matches!(
            store
                .update_job_progress("missing", JobUpdate::default())
                .await,
            Err(HarvestError::NotFound(_))
        ));

        store
            .update_job_progress(&second.job_id, JobUpdate::status(JobStatus::Completed))
            .await
            .unwrap();
        assert!(matches!(
            store
                .update_job_progress(&second.job_id, JobUpdate::status(JobStatus::Cancelled))
                .await,
            Err(HarvestError::JobFinished { status: JobStatus::Completed, .. })
        ));
        assert!(store
            .update_job_progress(&second.job_id, JobUpdate::progress(5, 5))
            .await
            .is_err());
        let finished = store.get_job(&second.job_id).await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.completed_count, 0);

        let r1 = JobResult::new(&first.job_id, 1, ItemStatus::Failed);
        let r0 = JobResult::new(&first.job_id, 0, ItemStatus::Success).with_canonical_id("42");
        assert!(store.append_job_result(&r1).await.unwrap());
        assert!(store.append_job_result(&r0).await.unwrap());
        assert!(!store
            .append_job_result(&JobResult::new(&first.job_id, 0, ItemStatus::Error))
            .await
            .unwrap());
        let results = store.list_job_results(&first.job_id).await.unwrap();
        assert_eq!(
            results.iter().map(|r| r.item_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(results[0].status, ItemStatus::Success);
        assert!(store.list_job_results(&second.job_id).await.unwrap().is_empty());

        store
            .append_entry(&success_entry("42", "Sleep and memory", "Doe"))
            .await
            .unwrap();
        assert!(matches!(
            store
                .append_entry(&success_entry("42", "Other title", "Roe"))
                .await,
            Err(HarvestError::DuplicateIdentifier(id)) if id == "42"
        ));
        let failed = Entry::search_failed(&CitationItem::raw("Unmatched reference"));
        store.append_entry(&failed).await.unwrap();
        store.append_entry(&failed).await.unwrap();
        assert!(store.entry_exists_by_canonical_id("42").await.unwrap());
        assert!(!store.entry_exists_by_canonical_id("43").await.unwrap());

        store
            .update_entry_artifact_flag("42", ArtifactKind::Pdf, true)
            .await
            .unwrap();
        assert!(store
            .update_entry_artifact_flag("43", ArtifactKind::Pdf, true)
            .await
            .is_err());
        let entry = store.get_entry("42").await.unwrap().unwrap();
        assert!(entry.artifacts.pdf);
        assert!(!entry.artifacts.text);

        assert_eq!(store.list_entries().await.unwrap().len(), 3);
        assert_eq!(store.search_entries("MEMORY").await.unwrap().len(), 1);
        assert_eq!(store.search_entries("doe").await.unwrap().len(), 1);
        assert_eq!(store.search_entries("").await.unwrap().len(), 3);

        let stats = store.entry_statistics().await.unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.pdf_available, 1);
    }
}
