//! The job registry: one persistence-backed view of every job, plus the
//! cancellation tokens of the jobs this process is running.
//!
//! Non-terminal jobs written through the registry are cached by id. Every
//! write goes to the store first and is mirrored into the cache only once
//! committed, so a cached read is never older than the last persisted
//! write. Jobs leave the cache when they reach a terminal state.

use std::collections::HashMap;

use chrono::Utc;
use shotforge_core::types::JobId;
use shotforge_db::models::job::{Job, JobOutcome, JobPage, NewJob};
use shotforge_db::models::shot::{NewShot, Shot};
use shotforge_db::models::status::JobStatus;
use shotforge_db::{JobStore, StoreError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub struct JobRegistry<S: JobStore> {
    store: S,
    cache: RwLock<HashMap<JobId, Job>>,
    /// Tokens of jobs dispatched to a worker in this process.
    active: RwLock<HashMap<JobId, CancellationToken>>,
}

impl<S: JobStore> JobRegistry<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        if let Some(job) = self.cache.read().await.get(&id) {
            return Ok(Some(job.clone()));
        }
        self.store.find(id).await
    }

    /// Read straight from the store, bypassing the cache.
    pub async fn load(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.store.find(id).await
    }

    pub async fn list(
        &self,
        status: Option<JobStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<JobPage, StoreError> {
        self.store.list(status, offset, limit).await
    }

    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        self.store.list_by_status(status).await
    }

    pub async fn shots(&self, id: JobId) -> Result<Vec<Shot>, StoreError> {
        self.store.list_shots(id).await
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub async fn insert(&self, job: &NewJob) -> Result<Job, StoreError> {
        let created = self.store.insert(job).await?;
        self.cache.write().await.insert(created.id, created.clone());
        Ok(created)
    }

    /// Queued → Processing. `None` if the job was not Queued.
    pub async fn mark_processing(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        if !self.store.mark_processing(id).await? {
            return Ok(None);
        }
        let job = self.store.find(id).await?.ok_or(StoreError::NotFound(id))?;
        self.cache.write().await.insert(id, job.clone());
        Ok(Some(job))
    }

    /// Persist a progress update. `false` if it was stale and skipped.
    pub async fn update_progress(
        &self,
        id: JobId,
        percent: u8,
        message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let written = self.store.update_progress(id, percent, message).await?;
        if written {
            if let Some(job) = self.cache.write().await.get_mut(&id) {
                job.progress = percent;
                if let Some(message) = message {
                    job.message = Some(message.to_string());
                }
                job.updated_at = Utc::now();
            }
        }
        Ok(written)
    }

    pub async fn record_shot(&self, shot: &NewShot) -> Result<Shot, StoreError> {
        let stored = self.store.append_shot(shot).await?;
        if let Some(job) = self.cache.write().await.get_mut(&shot.job_id) {
            job.completed_shots += 1;
        }
        Ok(stored)
    }

    /// Enter a terminal state. `false` if the job was already terminal.
    pub async fn finish(&self, id: JobId, outcome: &JobOutcome) -> Result<bool, StoreError> {
        let written = self.store.finish(id, outcome).await?;
        self.cache.write().await.remove(&id);
        Ok(written)
    }

    /// Queued → Cancelled. `false` if the job was not Queued.
    pub async fn cancel_queued(&self, id: JobId, message: &str) -> Result<bool, StoreError> {
        let written = self.store.cancel_queued(id, message).await?;
        if written {
            self.cache.write().await.remove(&id);
        }
        Ok(written)
    }

    pub async fn fail_interrupted(&self, reason: &str) -> Result<Vec<JobId>, StoreError> {
        let failed = self.store.fail_interrupted(reason).await?;
        let mut cache = self.cache.write().await;
        for id in &failed {
            cache.remove(id);
        }
        Ok(failed)
    }

    // -----------------------------------------------------------------------
    // Cancellation tokens
    // -----------------------------------------------------------------------

    /// Register a token for a job about to be handed to a worker. The token
    /// is a child of `parent`, so cancelling `parent` reaches every job.
    ///
    /// `None` if the job already has one, i.e. another worker owns it.
    pub async fn activate(&self, id: JobId, parent: &CancellationToken) -> Option<CancellationToken> {
        let mut active = self.active.write().await;
        if active.contains_key(&id) {
            return None;
        }
        let token = parent.child_token();
        active.insert(id, token.clone());
        Some(token)
    }

    pub async fn token(&self, id: JobId) -> Option<CancellationToken> {
        self.active.read().await.get(&id).cloned()
    }

    pub async fn is_active(&self, id: JobId) -> bool {
        self.active.read().await.contains_key(&id)
    }

    pub async fn release(&self, id: JobId) {
        self.active.write().await.remove(&id);
    }

    /// Cancel every active job. Returns how many were signalled.
    pub async fn cancel_all(&self) -> usize {
        let active = self.active.read().await;
        for token in active.values() {
            token.cancel();
        }
        active.len()
    }
}
