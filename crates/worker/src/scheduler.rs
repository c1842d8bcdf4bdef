//! Job scheduler: admission, status, cancellation, dispatch and restart
//! recovery.
//!
//! One dispatch loop takes a pool permit, then the next queued job id, and
//! hands both to a freshly spawned worker root; it never waits on a run.
//! A sweep loop picks up Queued rows written by other processes (the
//! `submit` CLI) that this process has not seen yet.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use shotforge_core::error::CoreError;
use shotforge_core::job::JobKind;
use shotforge_core::settings::DatasetSettings;
use shotforge_core::types::JobId;
use shotforge_core::validation::{validate_asset, AssetPolicy};
use shotforge_db::models::job::{Job, JobOutcome, JobPage, JobView, NewJob};
use shotforge_db::models::shot::Shot;
use shotforge_db::models::status::JobStatus;
use shotforge_db::{JobStore, StoreError};
use shotforge_events::{EventBus, JobEvent, JobEventKind};
use shotforge_render::RenderSurface;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::queue::{JobQueue, QueueFull};
use crate::registry::JobRegistry;
use crate::worker::{JobRunner, Worker, CANCELLED_MESSAGE};

/// Reason recorded on jobs found Processing at startup.
pub const INTERRUPTED_MESSAGE: &str = "Server restarted, job interrupted";

const QUEUED_MESSAGE: &str = "Queued for processing";

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Bad asset or parameters. No job was created.
    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error(transparent)]
    QueueFull(#[from] QueueFull),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was cancelled, or its worker has been signalled.
    Accepted,
    /// The job had already reached a terminal state.
    AlreadyTerminal,
    NotFound,
}

/// What [`Scheduler::recover`] did at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs left Processing by a previous process, now failed.
    pub failed: Vec<JobId>,
    /// Queued jobs put back on the queue.
    pub requeued: usize,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub max_concurrent_jobs: usize,
    pub max_queued_jobs: usize,
    pub job_timeout: Duration,
    pub sweep_interval: Duration,
    pub shutdown_timeout: Duration,
    pub asset_policy: AssetPolicy,
    /// Default settings document submissions are merged over.
    pub defaults: Value,
}

impl SchedulerOptions {
    pub fn from_config(config: &WorkerConfig, defaults: Value) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs,
            max_queued_jobs: config.max_queued_jobs,
            job_timeout: config.job_timeout,
            sweep_interval: config.sweep_interval,
            shutdown_timeout: config.shutdown_timeout,
            asset_policy: AssetPolicy::with_max_mb(config.max_upload_mb),
            defaults,
        }
    }
}

/// Validate a submission and build the row to insert.
///
/// Dataset parameters are merged over `defaults` and validated; the merged
/// document is what gets stored. Training parameters are stored as given.
pub fn prepare(
    kind: JobKind,
    asset: &Path,
    overrides: &Value,
    policy: &AssetPolicy,
    defaults: &Value,
) -> Result<NewJob, SchedulerError> {
    validate_asset(asset, policy)?;

    let overrides = match overrides {
        Value::Null => json!({}),
        Value::Object(_) => overrides.clone(),
        _ => {
            return Err(CoreError::Validation("Parameters must be a JSON object".to_string()).into())
        }
    };

    let (parameters, total_shots, use_minimal) = match kind {
        JobKind::Dataset => {
            let (settings, merged) = DatasetSettings::resolve(defaults, &overrides)?;
            let estimate = settings.estimate()?;
            (merged, Some(estimate.total_shots as i64), settings.use_minimal)
        }
        JobKind::Training => (overrides, None, false),
    };

    Ok(NewJob {
        id: Uuid::now_v7(),
        kind,
        asset_path: asset.display().to_string(),
        parameters,
        total_shots,
        use_minimal,
        message: Some(QUEUED_MESSAGE.to_string()),
    })
}

pub struct Scheduler<S: JobStore, R: RenderSurface> {
    registry: Arc<JobRegistry<S>>,
    queue: Arc<JobQueue>,
    events: Arc<EventBus>,
    runner: Arc<JobRunner<R>>,
    permits: Arc<Semaphore>,
    options: SchedulerOptions,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl<S: JobStore, R: RenderSurface> Scheduler<S, R> {
    pub fn new(
        store: S,
        runner: JobRunner<R>,
        events: Arc<EventBus>,
        options: SchedulerOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(JobRegistry::new(store)),
            queue: JobQueue::new(options.max_queued_jobs),
            events,
            runner: Arc::new(runner),
            permits: Arc::new(Semaphore::new(options.max_concurrent_jobs)),
            options,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<JobRegistry<S>> {
        &self.registry
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    // -----------------------------------------------------------------------
    // Client operations
    // -----------------------------------------------------------------------

    /// Accept a job. It is persisted as Queued before this returns.
    pub async fn submit(
        &self,
        kind: JobKind,
        asset: &Path,
        parameters: &Value,
    ) -> Result<JobId, SchedulerError> {
        let slot = self.queue.reserve()?;
        let new_job = prepare(
            kind,
            asset,
            parameters,
            &self.options.asset_policy,
            &self.options.defaults,
        )?;
        let job = self.registry.insert(&new_job).await?;
        slot.push(job.id);

        tracing::info!(
            job_id = %job.id,
            kind = %kind,
            asset = %job.asset_path,
            waiting = self.queue.len(),
            "Job submitted",
        );
        self.events.publish(
            JobEvent::new(job.id, JobEventKind::Queued, 0).with_message(QUEUED_MESSAGE),
        );
        Ok(job.id)
    }

    pub async fn status(&self, id: JobId) -> Result<Option<JobView>, SchedulerError> {
        Ok(self.registry.get(id).await?.as_ref().map(JobView::from))
    }

    /// Newest first. A persistence failure yields an empty page.
    pub async fn list(&self, status: Option<JobStatus>, offset: i64, limit: i64) -> JobPage {
        match self.registry.list(status, offset, limit).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "Job listing failed, returning empty page");
                JobPage {
                    offset,
                    limit,
                    ..Default::default()
                }
            }
        }
    }

    /// Full job row including the diagnostic trace. Operator use only.
    pub async fn diagnostics(&self, id: JobId) -> Result<Option<Job>, SchedulerError> {
        Ok(self.registry.load(id).await?)
    }

    /// Shots captured so far, in capture order.
    pub async fn shots(&self, id: JobId) -> Result<Vec<Shot>, SchedulerError> {
        Ok(self.registry.shots(id).await?)
    }

    /// Request cancellation. Queued jobs are cancelled on the spot;
    /// running jobs are signalled and finish on their own.
    pub async fn cancel(&self, id: JobId) -> Result<CancelOutcome, SchedulerError> {
        let Some(job) = self.registry.load(id).await? else {
            return Ok(CancelOutcome::NotFound);
        };
        if job.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }

        if job.status == JobStatus::Queued
            && self.registry.cancel_queued(id, CANCELLED_MESSAGE).await?
        {
            self.queue.remove(id);
            if let Some(token) = self.registry.token(id).await {
                token.cancel();
            }
            tracing::info!(job_id = %id, "Queued job cancelled");
            self.events.publish(
                JobEvent::new(id, JobEventKind::Cancelled, job.progress)
                    .with_message(CANCELLED_MESSAGE),
            );
            return Ok(CancelOutcome::Accepted);
        }

        if let Some(token) = self.registry.token(id).await {
            token.cancel();
            tracing::info!(job_id = %id, "Cancellation requested");
            return Ok(CancelOutcome::Accepted);
        }

        // Not owned by a worker here: it may have just finished, or it is
        // a Processing row nobody is running any more.
        match self.registry.load(id).await? {
            None => Ok(CancelOutcome::NotFound),
            Some(job) if job.status.is_terminal() => Ok(CancelOutcome::AlreadyTerminal),
            Some(job) => {
                let outcome = JobOutcome::Cancelled {
                    message: CANCELLED_MESSAGE.to_string(),
                };
                if !self.registry.finish(id, &outcome).await? {
                    return Ok(CancelOutcome::AlreadyTerminal);
                }
                tracing::warn!(job_id = %id, status = %job.status, "Cancelled job with no active worker");
                self.events.publish(
                    JobEvent::new(id, JobEventKind::Cancelled, job.progress)
                        .with_message(CANCELLED_MESSAGE),
                );
                Ok(CancelOutcome::Accepted)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Fail jobs orphaned by a previous process and requeue the Queued
    /// ones. Call once before [`Scheduler::start`].
    pub async fn recover(&self) -> Result<RecoveryReport, SchedulerError> {
        let failed = self.registry.fail_interrupted(INTERRUPTED_MESSAGE).await?;
        for id in &failed {
            tracing::warn!(job_id = %id, "Interrupted job marked failed");
            self.events.publish(
                JobEvent::new(*id, JobEventKind::Failed, 0).with_message(INTERRUPTED_MESSAGE),
            );
        }

        let mut requeued = 0;
        for job in self.registry.list_by_status(JobStatus::Queued).await? {
            if self.queue.push_existing(job.id) {
                requeued += 1;
            }
        }

        tracing::info!(failed = failed.len(), requeued, "Job recovery complete");
        Ok(RecoveryReport { failed, requeued })
    }

    /// Spawn the dispatch and sweep loops.
    pub fn start(self: &Arc<Self>) {
        tracing::info!(
            max_concurrent_jobs = self.options.max_concurrent_jobs,
            max_queued_jobs = self.options.max_queued_jobs,
            "Scheduler started",
        );
        let dispatcher = Arc::clone(self);
        self.tasks.spawn(async move { dispatcher.dispatch_loop().await });
        let sweeper = Arc::clone(self);
        self.tasks.spawn(async move { sweeper.sweep_loop().await });
    }

    /// Stop dispatching, cancel running jobs and wait for their worker
    /// roots to finalise, up to the shutdown timeout.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let signalled = self.registry.cancel_all().await;
        self.tasks.close();
        tracing::info!(active_jobs = signalled, "Scheduler shutting down");

        if tokio::time::timeout(self.options.shutdown_timeout, self.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = self.options.shutdown_timeout.as_secs(),
                remaining = self.tasks.len(),
                "Timed out waiting for workers to finish",
            );
        }
    }

    async fn dispatch_loop(&self) {
        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let job_id = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                id = self.queue.pop() => id,
            };

            let Some(token) = self.registry.activate(job_id, &self.shutdown).await else {
                tracing::debug!(job_id = %job_id, "Job already owned by a worker");
                continue;
            };

            tracing::debug!(job_id = %job_id, "Dispatching job");
            let worker = Worker {
                registry: Arc::clone(&self.registry),
                events: Arc::clone(&self.events),
                runner: Arc::clone(&self.runner),
                timeout: self.options.job_timeout,
                shutdown: self.shutdown.clone(),
            };
            self.tasks.spawn(worker.run(job_id, token, permit));
        }
        tracing::info!("Job dispatcher stopped");
    }

    async fn sweep_loop(&self) {
        let mut ticker = tokio::time::interval(self.options.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; recovery already ran.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.sweep().await,
            }
        }
    }

    async fn sweep(&self) {
        let queued = match self.registry.list_by_status(JobStatus::Queued).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "Queue sweep failed");
                return;
            }
        };
        for job in queued {
            if self.registry.is_active(job.id).await {
                continue;
            }
            if self.queue.push_existing(job.id) {
                tracing::debug!(job_id = %job.id, "Picked up queued job");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use shotforge_core::settings::default_document;

    use super::*;

    fn asset(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("avatar.vrm");
        std::fs::write(&path, vec![7u8; 2048]).unwrap();
        path
    }

    #[test]
    fn dataset_parameters_are_merged_and_estimated() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = json!({
            "angle": { "start": 0, "end": 350, "step": 10 },
            "expressions": ["Neutral"],
            "lighting": ["Normal"],
            "camera_distance": ["Mid-shot"]
        });

        let job = prepare(
            JobKind::Dataset,
            &asset(dir.path()),
            &overrides,
            &AssetPolicy::default(),
            &default_document().unwrap(),
        )
        .unwrap();

        assert_eq!(job.total_shots, Some(36));
        assert_eq!(job.parameters["expressions"], json!(["Neutral"]));
        assert_eq!(job.parameters["output"]["format"], "png");
        assert!(!job.use_minimal);
    }

    #[test]
    fn training_parameters_are_stored_as_given() {
        let dir = tempfile::tempdir().unwrap();
        let job = prepare(
            JobKind::Training,
            &asset(dir.path()),
            &Value::Null,
            &AssetPolicy::default(),
            &default_document().unwrap(),
        )
        .unwrap();

        assert_eq!(job.parameters, json!({}));
        assert_eq!(job.total_shots, None);
    }

    #[test]
    fn invalid_submissions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let asset = asset(dir.path());
        let defaults = default_document().unwrap();
        let policy = AssetPolicy::default();

        assert_matches!(
            prepare(JobKind::Dataset, &asset, &json!([1, 2]), &policy, &defaults),
            Err(SchedulerError::Validation(_))
        );
        assert_matches!(
            prepare(
                JobKind::Dataset,
                &asset,
                &json!({ "angle": { "start": 90, "end": 10, "step": 10 } }),
                &policy,
                &defaults
            ),
            Err(SchedulerError::Validation(_))
        );
        assert_matches!(
            prepare(
                JobKind::Dataset,
                &dir.path().join("missing.vrm"),
                &Value::Null,
                &policy,
                &defaults
            ),
            Err(SchedulerError::Validation(_))
        );
    }
}
