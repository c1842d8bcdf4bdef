//! Worker roots: one task per dispatched job.
//!
//! A worker root owns its job from `Processing` to a terminal state. The
//! run itself executes in a child task so that a panic is caught and
//! recorded like any other failure; whatever happens, the root ends with
//! exactly one terminal write.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use shotforge_core::job::JobKind;
use shotforge_core::types::JobId;
use shotforge_db::models::job::{Job, JobOutcome};
use shotforge_db::models::shot::NewShot;
use shotforge_db::JobStore;
use shotforge_events::{EventBus, JobEvent, JobEventKind};
use shotforge_pipeline::{
    CapturedShot, DatasetEngine, DatasetRequest, ProgressSink, ProgressUpdate, RunError,
    TrainingRunner,
};
use shotforge_render::RenderSurface;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;

use crate::registry::JobRegistry;

/// Message recorded on jobs that stopped because of a cancel request.
pub const CANCELLED_MESSAGE: &str = "Job cancelled";

/// Reason recorded on jobs cut short by a shutdown.
pub const SHUTDOWN_MESSAGE: &str = "Server shutting down, job interrupted";

/// How long a timed-out run gets to honour cancellation before its task is
/// aborted. Dropping the run closes its rendering session in the background.
const ABANDON_GRACE: Duration = Duration::from_secs(15);

/// Executes the work behind each job kind.
pub struct JobRunner<R: RenderSurface> {
    engine: DatasetEngine<R>,
    training: TrainingRunner,
}

impl<R: RenderSurface> JobRunner<R> {
    pub fn new(engine: DatasetEngine<R>, training: TrainingRunner) -> Self {
        Self { engine, training }
    }

    /// Run `job` and return the path of its result.
    pub async fn execute(
        &self,
        job: &Job,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, RunError> {
        let asset = PathBuf::from(&job.asset_path);
        match job.kind {
            JobKind::Dataset => {
                let request = DatasetRequest::new(job.id, asset, job.parameters.clone())?;
                let archive = self.engine.run(&request, sink, cancel).await?;
                Ok(archive.path)
            }
            JobKind::Training => self.training.run(job.id, &asset, sink, cancel).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress plumbing
// ---------------------------------------------------------------------------

enum SinkMessage {
    Progress(ProgressUpdate),
    Shot(CapturedShot),
}

/// Hands updates to the persister without blocking the run.
struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl ProgressSink for ChannelSink {
    fn report(&self, update: ProgressUpdate) {
        let _ = self.tx.send(SinkMessage::Progress(update));
    }

    fn record_shot(&self, shot: &CapturedShot) {
        let _ = self.tx.send(SinkMessage::Shot(shot.clone()));
    }
}

/// Write progress and shot records in the order the run produced them.
/// Ends when the sink is dropped.
async fn persist_updates<S: JobStore>(
    registry: Arc<JobRegistry<S>>,
    events: Arc<EventBus>,
    job_id: JobId,
    mut rx: mpsc::UnboundedReceiver<SinkMessage>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            SinkMessage::Progress(update) => {
                match registry
                    .update_progress(job_id, update.percent, Some(&update.message))
                    .await
                {
                    Ok(true) => events.publish(
                        JobEvent::new(job_id, JobEventKind::Progress, update.percent)
                            .with_message(update.message),
                    ),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to update job progress")
                    }
                }
            }
            SinkMessage::Shot(shot) => {
                let record = NewShot {
                    job_id,
                    position: shot.position as i64,
                    filename: shot.filename,
                    path: shot.path.display().to_string(),
                    configuration: shot.configuration,
                    width: shot.width,
                    height: shot.height,
                };
                if let Err(e) = registry.record_shot(&record).await {
                    tracing::error!(job_id = %job_id, shot = record.position, error = %e, "Failed to record shot");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker root
// ---------------------------------------------------------------------------

pub(crate) struct Worker<S: JobStore, R: RenderSurface> {
    pub registry: Arc<JobRegistry<S>>,
    pub events: Arc<EventBus>,
    pub runner: Arc<JobRunner<R>>,
    pub timeout: Duration,
    /// The scheduler's shutdown token; the job token is its child.
    pub shutdown: CancellationToken,
}

impl<S: JobStore, R: RenderSurface> Worker<S, R> {
    /// Own `job_id` until it is terminal. Holds `permit` for the duration.
    pub async fn run(self, job_id: JobId, cancel: CancellationToken, permit: OwnedSemaphorePermit) {
        let _permit = permit;
        self.process(job_id, cancel).await;
        self.registry.release(job_id).await;
    }

    async fn process(&self, job_id: JobId, cancel: CancellationToken) {
        let job = match self.registry.mark_processing(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::debug!(job_id = %job_id, "Job is no longer queued, skipping");
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to mark job processing");
                return;
            }
        };
        tracing::info!(job_id = %job_id, kind = %job.kind, "Job started");
        self.events
            .publish(JobEvent::new(job_id, JobEventKind::Started, job.progress));

        let (tx, rx) = mpsc::unbounded_channel();
        let persister = tokio::spawn(persist_updates(
            Arc::clone(&self.registry),
            Arc::clone(&self.events),
            job_id,
            rx,
        ));

        let mut execution = {
            let runner = Arc::clone(&self.runner);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let sink = ChannelSink { tx };
                runner.execute(&job, &sink, &cancel).await
            })
        };

        let outcome = match tokio::time::timeout(self.timeout, &mut execution).await {
            Ok(joined) => match outcome_of(joined) {
                JobOutcome::Cancelled { .. } if self.shutdown.is_cancelled() => JobOutcome::Failed {
                    summary: SHUTDOWN_MESSAGE.to_string(),
                    trace: None,
                },
                outcome => outcome,
            },
            Err(_) => {
                tracing::warn!(job_id = %job_id, timeout_secs = self.timeout.as_secs(), "Job timed out, cancelling");
                cancel.cancel();
                let joined = match tokio::time::timeout(ABANDON_GRACE, &mut execution).await {
                    Ok(joined) => Some(joined),
                    Err(_) => {
                        tracing::error!(job_id = %job_id, "Job ignored cancellation, aborting it");
                        execution.abort();
                        let _ = execution.await;
                        None
                    }
                };
                match joined.map(outcome_of) {
                    Some(completed @ JobOutcome::Completed { .. }) => completed,
                    _ => JobOutcome::Failed {
                        summary: format!("Job timed out after {}s", self.timeout.as_secs()),
                        trace: None,
                    },
                }
            }
        };

        // The sink is gone once the run task has ended; drain what it sent.
        if let Err(e) = persister.await {
            tracing::error!(job_id = %job_id, error = %e, "Progress persister failed");
        }

        self.finish(job_id, outcome).await;
    }

    async fn finish(&self, job_id: JobId, outcome: JobOutcome) {
        let event = match &outcome {
            JobOutcome::Completed { result_path, message } => {
                tracing::info!(job_id = %job_id, result = %result_path, "Job completed");
                JobEvent::new(job_id, JobEventKind::Completed, 100).with_message(message.clone())
            }
            JobOutcome::Failed { summary, .. } => {
                tracing::error!(job_id = %job_id, error = %summary, "Job failed");
                JobEvent::new(job_id, JobEventKind::Failed, 0).with_message(summary.clone())
            }
            JobOutcome::Cancelled { message } => {
                tracing::info!(job_id = %job_id, "Job cancelled");
                JobEvent::new(job_id, JobEventKind::Cancelled, 0).with_message(message.clone())
            }
        };

        match self.registry.finish(job_id, &outcome).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(job_id = %job_id, "Job was already terminal"),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record job outcome");
                return;
            }
        }

        let percent = match self.registry.load(job_id).await {
            Ok(Some(job)) => job.progress,
            _ => event.percent,
        };
        self.events.publish(JobEvent { percent, ..event });
    }
}

fn outcome_of(joined: Result<Result<PathBuf, RunError>, tokio::task::JoinError>) -> JobOutcome {
    match joined {
        Ok(Ok(path)) => JobOutcome::Completed {
            result_path: path.display().to_string(),
            message: "Job completed".to_string(),
        },
        Ok(Err(RunError::Cancelled)) => JobOutcome::Cancelled {
            message: CANCELLED_MESSAGE.to_string(),
        },
        Ok(Err(RunError::Failed(failure))) => JobOutcome::Failed {
            summary: failure.summary,
            trace: Some(failure.trace),
        },
        Err(e) if e.is_panic() => {
            let panic = e.into_panic();
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            JobOutcome::Failed {
                summary: format!("Worker panicked: {detail}"),
                trace: Some(detail),
            }
        }
        Err(e) => JobOutcome::Failed {
            summary: format!("Worker task aborted: {e}"),
            trace: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use shotforge_pipeline::{RunFailure, RunStage};

    use super::*;

    #[test]
    fn run_results_map_to_outcomes() {
        assert_matches!(
            outcome_of(Ok(Ok(PathBuf::from("datasets/x.zip")))),
            JobOutcome::Completed { result_path, .. } if result_path == "datasets/x.zip"
        );
        assert_matches!(
            outcome_of(Ok(Err(RunError::Cancelled))),
            JobOutcome::Cancelled { .. }
        );
        let failure = RunFailure::message(RunStage::Assembling, "disk full");
        assert_matches!(
            outcome_of(Ok(Err(RunError::Failed(failure)))),
            JobOutcome::Failed { summary, trace: Some(_) } if summary == "disk full"
        );
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let joined = tokio::spawn(async {
            if true {
                panic!("surface exploded");
            }
            Ok::<PathBuf, RunError>(PathBuf::new())
        })
        .await;

        let outcome = outcome_of(joined);
        assert_matches!(
            outcome,
            JobOutcome::Failed { summary, .. } if summary.contains("surface exploded")
        );
    }
}
