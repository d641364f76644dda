use super::{Store, StoreState};
use crate::error::Result;
use crate::types::{ArtifactKind, Entry, EntryStatistics, Job, JobResult, JobUpdate};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_new_job(job)?;
        state.put_job(job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.state.read().await.job(job_id).cloned())
    }

    async fn update_job_progress(&self, job_id: &str, update: JobUpdate) -> Result<Job> {
        let mut state = self.state.write().await;
        let job = state.updated_job(job_id, &update)?;
        state.put_job(job.clone());
        Ok(job)
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        Ok(self.state.read().await.recent_jobs(limit))
    }

    async fn append_job_result(&self, result: &JobResult) -> Result<bool> {
        Ok(self.state.write().await.insert_result(result.clone()))
    }

    async fn list_job_results(&self, job_id: &str) -> Result<Vec<JobResult>> {
        Ok(self.state.read().await.results(job_id))
    }

    async fn entry_exists_by_canonical_id(&self, canonical_id: &str) -> Result<bool> {
        Ok(self.state.read().await.has_entry(canonical_id))
    }

    async fn get_entry(&self, canonical_id: &str) -> Result<Option<Entry>> {
        Ok(self.state.read().await.entry(canonical_id).cloned())
    }

    async fn append_entry(&self, entry: &Entry) -> Result<()> {
        self.state.write().await.insert_entry(entry.clone())
    }

    async fn update_entry_artifact_flag(
        &self,
        canonical_id: &str,
        kind: ArtifactKind,
        available: bool,
    ) -> Result<()> {
        self.state
            .write()
            .await
            .set_flag(canonical_id, kind, available)
    }

    async fn list_entries(&self) -> Result<Vec<Entry>> {
        Ok(self.state.read().await.entries())
    }

    async fn search_entries(&self, query: &str) -> Result<Vec<Entry>> {
        Ok(self.state.read().await.search(query))
    }

    async fn entry_statistics(&self) -> Result<EntryStatistics> {
        Ok(self.state.read().await.statistics())
    }
}
