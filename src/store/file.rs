//! Append-log store.
//!
//! Three JSON-lines files under one directory:
//!
//! - `jobs.jsonl`: a `create` record holding the full job, then one small
//!   `progress` record per status or counter change
//! - `job_results.jsonl`: one result per line
//! - `entries.jsonl`: entry appends and artifact-flag changes
//!
//! Every mutation writes exactly one line while holding the store lock, and the
//! index is only updated once the line is written. A write that fails halfway
//! is cut back off the file. Opening replays the logs; lines that do not parse
//! (a write torn by a crash) are skipped. An unterminated last line is never
//! extended: the next record starts on a line of its own.
//!
//! Another process may append to the same logs (a CLI `cancel` next to a
//! running server). Before each operation the store reads whatever was
//! appended behind its back and applies it to the index.

use super::{Store, StoreState};
use crate::error::{HarvestError, Result};
use crate::types::{
    ArtifactKind, Entry, EntryStatistics, Job, JobResult, JobStatus, JobUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const JOBS_FILE: &str = "jobs.jsonl";
const RESULTS_FILE: &str = "job_results.jsonl";
const ENTRIES_FILE: &str = "entries.jsonl";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JobRecord {
    Create {
        job: Job,
    },
    Progress {
        job_id: String,
        status: JobStatus,
        total_items: u32,
        completed_count: u32,
        failed_count: u32,
        updated_at: DateTime<Utc>,
    },
}

impl JobRecord {
    fn progress(job: &Job) -> Self {
        Self::Progress {
            job_id: job.job_id.clone(),
            status: job.status,
            total_items: job.total_items,
            completed_count: job.completed_count,
            failed_count: job.failed_count,
            updated_at: job.updated_at,
        }
    }

    fn apply(self, state: &mut StoreState) {
        match self {
            Self::Create { job } => state.put_job(job),
            Self::Progress {
                job_id,
                status,
                total_items,
                completed_count,
                failed_count,
                updated_at,
            } => match state.job_mut(&job_id) {
                Some(job) => {
                    job.status = status;
                    job.total_items = total_items;
                    job.completed_count = completed_count;
                    job.failed_count = failed_count;
                    job.updated_at = updated_at;
                }
                None => warn!(job_id, "Progress record for unknown job"),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum EntryRecord {
    Append {
        entry: Entry,
    },
    SetFlag {
        canonical_id: String,
        kind: ArtifactKind,
        available: bool,
    },
}

impl EntryRecord {
    fn apply(self, state: &mut StoreState) {
        let applied = match self {
            Self::Append { entry } => state.insert_entry(entry),
            Self::SetFlag {
                canonical_id,
                kind,
                available,
            } => state.set_flag(&canonical_id, kind, available),
        };
        if let Err(e) = applied {
            warn!(error = %e, "Skipping inconsistent entry record");
        }
    }
}

fn apply_result(state: &mut StoreState, result: JobResult) {
    if !state.insert_result(result) {
        debug!("Skipping repeated job result");
    }
}

/// One append-only log and how much of it this store has read.
#[derive(Debug)]
struct Log {
    path: PathBuf,
    file: File,
    /// Bytes of complete lines already applied or written by this store.
    len: u64,
    /// Length of an unterminated fragment seen after `len`.
    fragment: u64,
}

impl Log {
    /// Open a log for appending and return its complete lines.
    async fn open(path: PathBuf) -> Result<(Self, String)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut log = Self {
            path,
            file,
            len: 0,
            fragment: 0,
        };
        let content = log.catch_up().await?;
        if log.fragment > 0 {
            warn!(file = %log.path.display(), bytes = log.fragment, "Log ends with a partial line");
        }
        Ok((log, content))
    }

    /// Complete lines appended since the last call. A trailing fragment is
    /// left unread so it can be picked up once its writer finishes it.
    async fn catch_up(&mut self) -> Result<String> {
        let actual = self.file.metadata().await?.len();
        if actual < self.len {
            warn!(file = %self.path.display(), "Log shrank underneath the store");
            self.len = actual;
            self.fragment = 0;
            return Ok(String::new());
        }
        if actual == self.len + self.fragment {
            return Ok(String::new());
        }

        let mut reader = File::open(&self.path).await?;
        reader.seek(SeekFrom::Start(self.len)).await?;
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).await?;

        let complete: &[u8] = match tail.iter().rposition(|&b| b == b'\n') {
            Some(end) => &tail[..=end],
            None => &[],
        };
        self.len += complete.len() as u64;
        self.fragment = (tail.len() - complete.len()) as u64;
        Ok(String::from_utf8_lossy(complete).into_owned())
    }

    async fn append<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let start = self.len + self.fragment;
        let mut line = Vec::new();
        // Never extend somebody else's unfinished line.
        if self.fragment > 0 {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, record)?;
        line.push(b'\n');

        if let Err(e) = write_line(&mut self.file, &line).await {
            // Drop whatever part of the line reached the file. If that fails
            // too, the next catch-up sees the leftover as a fragment.
            if let Err(trunc) = self.file.set_len(start).await {
                warn!(file = %self.path.display(), error = %trunc, "Could not cut back failed write");
            }
            return Err(HarvestError::Store(format!("Log write failed: {}", e)));
        }

        self.len = start + line.len() as u64;
        self.fragment = 0;
        Ok(())
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await
}

/// Parse every line of a log chunk, skipping the unreadable ones.
fn parse_lines<T: DeserializeOwned>(path: &Path, content: &str) -> Vec<T> {
    let mut records = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                file = %path.display(),
                line = number + 1,
                error = %e,
                "Skipping unreadable log line"
            ),
        }
    }
    records
}

#[derive(Debug)]
struct Inner {
    state: StoreState,
    jobs: Log,
    results: Log,
    entries: Log,
}

impl Inner {
    /// Apply records other processes appended since the last operation.
    async fn sync(&mut self) -> Result<()> {
        let jobs = self.jobs.catch_up().await?;
        for record in parse_lines::<JobRecord>(&self.jobs.path, &jobs) {
            record.apply(&mut self.state);
        }
        let results = self.results.catch_up().await?;
        for result in parse_lines::<JobResult>(&self.results.path, &results) {
            apply_result(&mut self.state, result);
        }
        let entries = self.entries.catch_up().await?;
        for record in parse_lines::<EntryRecord>(&self.entries.path, &entries) {
            record.apply(&mut self.state);
        }
        Ok(())
    }
}

/// [`Store`] persisted as append-only JSON-lines logs in a directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

impl FileStore {
    /// Open (creating if needed) the store in `dir` and replay its logs.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut state = StoreState::default();

        let (jobs, content) = Log::open(dir.join(JOBS_FILE)).await?;
        for record in parse_lines::<JobRecord>(&jobs.path, &content) {
            record.apply(&mut state);
        }

        let (results, content) = Log::open(dir.join(RESULTS_FILE)).await?;
        for result in parse_lines::<JobResult>(&results.path, &content) {
            apply_result(&mut state, result);
        }

        let (entries, content) = Log::open(dir.join(ENTRIES_FILE)).await?;
        for record in parse_lines::<EntryRecord>(&entries.path, &content) {
            record.apply(&mut state);
        }

        debug!(dir = %dir.display(), "Opened file store");
        Ok(Self {
            dir,
            inner: Mutex::new(Inner {
                state,
                jobs,
                results,
                entries,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn synced(&self) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.inner.lock().await;
        inner.sync().await?;
        Ok(inner)
    }
}

#[async_trait]
impl Store for FileStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let mut inner = self.synced().await?;
        inner.state.check_new_job(job)?;
        inner
            .jobs
            .append(&JobRecord::Create { job: job.clone() })
            .await?;
        inner.state.put_job(job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.synced().await?.state.job(job_id).cloned())
    }

    async fn update_job_progress(&self, job_id: &str, update: JobUpdate) -> Result<Job> {
        let mut inner = self.synced().await?;
        let job = inner.state.updated_job(job_id, &update)?;
        inner.jobs.append(&JobRecord::progress(&job)).await?;
        inner.state.put_job(job.clone());
        Ok(job)
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        Ok(self.synced().await?.state.recent_jobs(limit))
    }

    async fn append_job_result(&self, result: &JobResult) -> Result<bool> {
        let mut inner = self.synced().await?;
        if inner.state.has_result(&result.job_id, result.item_index) {
            return Ok(false);
        }
        inner.results.append(result).await?;
        Ok(inner.state.insert_result(result.clone()))
    }

    async fn list_job_results(&self, job_id: &str) -> Result<Vec<JobResult>> {
        Ok(self.synced().await?.state.results(job_id))
    }

    async fn entry_exists_by_canonical_id(&self, canonical_id: &str) -> Result<bool> {
        Ok(self.synced().await?.state.has_entry(canonical_id))
    }

    async fn get_entry(&self, canonical_id: &str) -> Result<Option<Entry>> {
        Ok(self.synced().await?.state.entry(canonical_id).cloned())
    }

    async fn append_entry(&self, entry: &Entry) -> Result<()> {
        let mut inner = self.synced().await?;
        inner.state.check_new_entry(entry)?;
        let record = EntryRecord::Append {
            entry: entry.clone(),
        };
        inner.entries.append(&record).await?;
        inner.state.insert_entry(entry.clone())
    }

    async fn update_entry_artifact_flag(
        &self,
        canonical_id: &str,
        kind: ArtifactKind,
        available: bool,
    ) -> Result<()> {
        let mut inner = self.synced().await?;
        inner.state.check_entry_exists(canonical_id)?;
        let record = EntryRecord::SetFlag {
            canonical_id: canonical_id.to_string(),
            kind,
            available,
        };
        inner.entries.append(&record).await?;
        inner.state.set_flag(canonical_id, kind, available)
    }

    async fn list_entries(&self) -> Result<Vec<Entry>> {
        Ok(self.synced().await?.state.entries())
    }

    async fn search_entries(&self, query: &str) -> Result<Vec<Entry>> {
        Ok(self.synced().await?.state.search(query))
    }

    async fn entry_statistics(&self) -> Result<EntryStatistics> {
        Ok(self.synced().await?.state.statistics())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{exercise_store, success_entry};
    use crate::types::ItemStatus;
    use std::io::Write;

    fn append_raw(dir: &Path, file: &str, bytes: &[u8]) {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.join(file))
            .unwrap();
        f.write_all(bytes).unwrap();
    }

    #[tokio::test]
    async fn test_file_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_reopen_replays_state() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new("1. A. B.\n2. C. D.", 2);
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.create_job(&job).await.unwrap();
            store
                .update_job_progress(
                    &job.job_id,
                    JobUpdate::progress(1, 1).with_status(JobStatus::Completed),
                )
                .await
                .unwrap();
            store
                .append_job_result(&JobResult::new(&job.job_id, 0, ItemStatus::Success))
                .await
                .unwrap();
            store
                .append_entry(&success_entry("7", "Heart failure", "Lee"))
                .await
                .unwrap();
            store
                .update_entry_artifact_flag("7", ArtifactKind::Text, true)
                .await
                .unwrap();
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        let reloaded = store.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Completed);
        assert_eq!(reloaded.processed_items(), 2);
        assert_eq!(reloaded.source_text, job.source_text);
        assert_eq!(store.list_job_results(&job.job_id).await.unwrap().len(), 1);
        assert!(store.entry_exists_by_canonical_id("7").await.unwrap());
        assert!(store.get_entry("7").await.unwrap().unwrap().artifacts.text);
        assert!(matches!(
            store.append_entry(&success_entry("7", "Again", "Lee")).await,
            Err(HarvestError::DuplicateIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn test_torn_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new("text", 1);
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.create_job(&job).await.unwrap();
        }
        append_raw(dir.path(), JOBS_FILE, br#"{"op":"create","job":{"job_id":"half-writ"#);

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.list_jobs(10).await.unwrap().len(), 1);

        let second = Job::new("more", 1);
        store.create_job(&second).await.unwrap();
        drop(store);

        let store = FileStore::open(dir.path()).await.unwrap();
        let ids: Vec<String> = store
            .list_jobs(10)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.job_id)
            .collect();
        assert_eq!(ids, vec![second.job_id, job.job_id]);
    }

    #[tokio::test]
    async fn test_partial_line_while_open_does_not_swallow_next_record() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new("text", 2);
        let store = FileStore::open(dir.path()).await.unwrap();
        store.create_job(&job).await.unwrap();

        append_raw(dir.path(), RESULTS_FILE, br#"{"job_id":"a","ite"#);
        assert!(store
            .append_job_result(&JobResult::new(&job.job_id, 0, ItemStatus::Success))
            .await
            .unwrap());

        append_raw(dir.path(), JOBS_FILE, br#"{"op":"progress","job_id""#);
        let later = Job::new("later", 1);
        store.create_job(&later).await.unwrap();
        drop(store);

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.list_job_results(&job.job_id).await.unwrap().len(), 1);
        assert_eq!(store.list_jobs(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_line_finished_by_its_writer_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.create_job(&Job::new("first", 1)).await.unwrap();

        let other = Job::new("written elsewhere", 1);
        let line = serde_json::to_string(&JobRecord::Create { job: other.clone() }).unwrap();
        let (head, rest) = line.split_at(line.len() / 2);

        append_raw(dir.path(), JOBS_FILE, head.as_bytes());
        assert_eq!(store.list_jobs(10).await.unwrap().len(), 1);

        append_raw(dir.path(), JOBS_FILE, format!("{}\n", rest).as_bytes());
        let seen = store.get_job(&other.job_id).await.unwrap().unwrap();
        assert_eq!(seen.source_text, "written elsewhere");
        assert_eq!(store.list_jobs(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_progress_records_omit_source_text() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new("1. Unmistakable marker reference. 2001.", 3);
        let store = FileStore::open(dir.path()).await.unwrap();
        store.create_job(&job).await.unwrap();
        for done in 1..=3 {
            store
                .update_job_progress(&job.job_id, JobUpdate::progress(done, 0))
                .await
                .unwrap();
        }

        let log = std::fs::read_to_string(dir.path().join(JOBS_FILE)).unwrap();
        assert_eq!(log.lines().count(), 4);
        assert_eq!(log.matches("Unmistakable marker").count(), 1);

        drop(store);
        let store = FileStore::open(dir.path()).await.unwrap();
        let reloaded = store.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(reloaded.completed_count, 3);
        assert_eq!(reloaded.source_text, job.source_text);
    }

    #[tokio::test]
    async fn test_cancel_from_another_handle_is_seen() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new("1. A. B.", 1);

        let server = FileStore::open(dir.path()).await.unwrap();
        server.create_job(&job).await.unwrap();
        server
            .update_job_progress(&job.job_id, JobUpdate::status(JobStatus::Processing))
            .await
            .unwrap();

        let cli = FileStore::open(dir.path()).await.unwrap();
        cli.update_job_progress(&job.job_id, JobUpdate::status(JobStatus::Cancelled))
            .await
            .unwrap();

        assert!(matches!(
            server
                .update_job_progress(&job.job_id, JobUpdate::progress(1, 0))
                .await,
            Err(HarvestError::JobFinished {
                status: JobStatus::Cancelled,
                ..
            })
        ));
        let seen = server.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(seen.status, JobStatus::Cancelled);

        cli.append_entry(&success_entry("9", "Seen elsewhere", "Kim"))
            .await
            .unwrap();
        assert!(server.entry_exists_by_canonical_id("9").await.unwrap());

        drop(server);
        drop(cli);
        let store = FileStore::open(dir.path()).await.unwrap();
        let persisted = store.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(persisted.status, JobStatus::Cancelled);
        assert_eq!(persisted.completed_count, 0);
    }
}
