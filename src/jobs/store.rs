//! Durable keyed storage for job records, shared by every worker.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use super::job::Job;
use super::lifecycle::TransitionError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} already exists")]
    Duplicate(String),

    #[error("job {0} is not in the store")]
    Missing(String),

    #[error("job {0} is terminal and cannot be overwritten")]
    Terminal(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Atomically moves a pending job to processing. `None` when the job is
    /// unknown or someone else got there first.
    async fn claim(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Replaces the stored record. Fails if the stored copy is already terminal.
    async fn save(&self, job: &Job) -> Result<(), StoreError>;

    /// Deletes every job that finished before `cutoff`, returning their ids.
    /// Jobs still pending or running are kept.
    async fn remove_finished_before(&self, cutoff: DateTime<Utc>)
    -> Result<Vec<String>, StoreError>;

    async fn list(&self) -> Result<Vec<Job>, StoreError>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn claim(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(job) => Ok(job.claim().is_ok().then(|| job.clone())),
            None => Ok(None),
        }
    }

    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&job.id)
            .ok_or_else(|| StoreError::Missing(job.id.clone()))?;
        if stored.status.is_terminal() {
            return Err(StoreError::Terminal(job.id.clone()));
        }
        *stored = job.clone();
        Ok(())
    }

    async fn remove_finished_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let mut jobs = self.jobs.write().await;
        let expired: Vec<String> = jobs
            .values()
            .filter(|j| j.finished_before(cutoff))
            .map(|j| j.id.clone())
            .collect();
        for id in &expired {
            jobs.remove(id);
        }
        Ok(expired)
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}

/// One JSON document per job under a directory.
///
/// Writes go to a temporary file that is renamed over the target, so a
/// crash never leaves a half-written record. A process-wide mutex makes
/// read-modify-write sequences (`claim`, `save`) atomic.
pub struct FileJobStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileJobStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids come from clients; anything but a plain token never maps to a file.
    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| self.dir.join(format!("{id}.json")))
    }

    async fn read(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, job: &Job) -> Result<(), StoreError> {
        let path = self
            .path_for(&job.id)
            .ok_or_else(|| StoreError::Missing(job.id.clone()))?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(job)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Job>(&bytes) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable job record");
                }
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        if self.read(&job.id).await?.is_some() {
            return Err(StoreError::Duplicate(job.id));
        }
        self.write(&job).await
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        self.read(id).await
    }

    async fn claim(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let _guard = self.lock.lock().await;
        let Some(mut job) = self.read(id).await? else {
            return Ok(None);
        };
        if job.claim().is_err() {
            return Ok(None);
        }
        self.write(&job).await?;
        Ok(Some(job))
    }

    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        match self.read(&job.id).await? {
            None => Err(StoreError::Missing(job.id.clone())),
            Some(stored) if stored.status.is_terminal() => {
                Err(StoreError::Terminal(job.id.clone()))
            }
            Some(_) => self.write(job).await,
        }
    }

    async fn remove_finished_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let _guard = self.lock.lock().await;
        let mut removed = Vec::new();
        for job in self.read_all().await? {
            if !job.finished_before(cutoff) {
                continue;
            }
            if let Some(path) = self.path_for(&job.id) {
                tokio::fs::remove_file(path).await?;
                removed.push(job.id);
            }
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        self.read_all().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::coordinator::{CoordinationMode, CoordinationRequest};
    use crate::jobs::{JobFailure, JobFailureKind, JobStatus};

    fn job(query: &str) -> Job {
        Job::new(CoordinationRequest::new(query, CoordinationMode::Sequential), 30)
    }

    async fn exercise(store: Arc<dyn JobStore>) {
        let job = job("draft release notes");
        let id = job.id.clone();
        store.insert(job.clone()).await.unwrap();
        assert!(matches!(
            store.insert(job).await,
            Err(StoreError::Duplicate(_))
        ));

        let fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert!(store.get("missing").await.unwrap().is_none());

        let claimed = store.claim(&id).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert!(store.claim(&id).await.unwrap().is_none());

        let mut running = claimed;
        running.report_progress(50, "halfway").unwrap();
        store.save(&running).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().unwrap().progress, 50);

        running
            .fail(JobFailure::new(JobFailureKind::Total, "nothing produced"))
            .unwrap();
        store.save(&running).await.unwrap();

        let mut stale = running.clone();
        stale.status = JobStatus::Processing;
        assert!(matches!(
            store.save(&stale).await,
            Err(StoreError::Terminal(_))
        ));
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn memory_store_lifecycle() {
        exercise(Arc::new(MemoryJobStore::new())).await;
    }

    #[tokio::test]
    async fn file_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path().join("jobs")).await.unwrap();
        exercise(Arc::new(store)).await;
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryJobStore::new());
        let job = job("review the plan");
        let id = job.id.clone();
        store.insert(job).await.unwrap();

        let attempts = (0..8).map(|_| {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move { store.claim(&id).await.unwrap().is_some() })
        });
        let wins = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let job = job("persist me");
        let id = job.id.clone();
        {
            let store = FileJobStore::open(dir.path()).await.unwrap();
            store.insert(job).await.unwrap();
        }
        let reopened = FileJobStore::open(dir.path()).await.unwrap();
        let listed = reopened.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
    }

    #[tokio::test]
    async fn file_store_ignores_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        assert!(store.get("../etc/passwd").await.unwrap().is_none());
        assert!(store.claim("a/b").await.unwrap().is_none());
    }

    fn finished(query: &str, at: chrono::DateTime<Utc>) -> Job {
        let mut job = job(query);
        job.fail(JobFailure::new(JobFailureKind::Total, "nothing produced"))
            .unwrap();
        job.created_at = at;
        job.completed_at = Some(at);
        job
    }

    #[tokio::test]
    async fn retention_removes_only_finished_jobs() {
        let store = MemoryJobStore::new();
        let long_ago = Utc::now() - Duration::hours(48);
        let done = finished("done", long_ago);
        let mut queued = job("backlogged");
        queued.created_at = long_ago;
        let mut running = job("running");
        running.created_at = long_ago;
        running.claim().unwrap();
        let recent = finished("recent", Utc::now());
        let ids: Vec<String> = [&done, &queued, &running, &recent]
            .iter()
            .map(|j| j.id.clone())
            .collect();
        for j in [done, queued, running, recent] {
            store.insert(j).await.unwrap();
        }

        let removed = store
            .remove_finished_before(Utc::now() - Duration::hours(24))
            .await
            .unwrap();

        assert_eq!(removed, vec![ids[0].clone()]);
        for id in &ids[1..] {
            assert!(store.get(id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn file_store_retention() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        let mut backlogged = job("backlogged");
        backlogged.created_at = Utc::now() - Duration::days(3);
        store
            .insert(finished("old", Utc::now() - Duration::days(3)))
            .await
            .unwrap();
        store.insert(backlogged).await.unwrap();
        store.insert(job("fresh")).await.unwrap();

        let removed = store
            .remove_finished_before(Utc::now() - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn file_store_concurrent_claims_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileJobStore::open(dir.path()).await.unwrap());
        let job = job("review the plan");
        let id = job.id.clone();
        store.insert(job).await.unwrap();

        let attempts = (0..8).map(|_| {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move { store.claim(&id).await.unwrap().is_some() })
        });
        let wins = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        assert_eq!(wins, 1);

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(
            stored.status_history,
            vec![JobStatus::Pending, JobStatus::Processing]
        );
    }

    #[tokio::test]
    async fn memory_store_claim_moves_pending_once() {
        let store = MemoryJobStore::new();
        let job = job("claim me");
        let id = job.id.clone();
        store.insert(job).await.unwrap();

        let claimed = store.claim(&id).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert!(claimed.started_at.is_some());
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
        assert!(store.claim(&id).await.unwrap().is_none());
        assert!(store.claim("unknown").await.unwrap().is_none());
    }
}
