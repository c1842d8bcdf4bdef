//! Placeholder runner for training jobs.
//!
//! No model is trained. The runner walks three fixed-delay phases so that
//! training jobs move through the scheduler like real work, then writes a
//! small JSON result file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use shotforge_core::types::JobId;
use tokio_util::sync::CancellationToken;

use crate::error::{AssembleError, RunError};
use crate::progress::{ProgressSink, ProgressTracker, RunStage};

const PHASES: [(u8, &str); 3] = [
    (10, "Analysing model"),
    (30, "Generating adapter"),
    (70, "Optimising adapter"),
];

/// Runs placeholder training jobs.
#[derive(Debug, Clone)]
pub struct TrainingRunner {
    results_dir: PathBuf,
    phase_delay: Duration,
}

impl TrainingRunner {
    pub const DEFAULT_PHASE_DELAY: Duration = Duration::from_secs(2);

    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
            phase_delay: Self::DEFAULT_PHASE_DELAY,
        }
    }

    pub fn with_phase_delay(mut self, delay: Duration) -> Self {
        self.phase_delay = delay;
        self
    }

    /// Run the phases, checking `cancel` before each and after the last,
    /// and return the path of the result file.
    pub async fn run(
        &self,
        job_id: JobId,
        asset: &Path,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, RunError> {
        let mut progress = ProgressTracker::new(sink);
        for (percent, message) in PHASES {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            progress.set(percent, message);
            tracing::debug!(job_id = %job_id, percent, "Training phase started");
            tokio::time::sleep(self.phase_delay).await;
        }
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        tokio::fs::create_dir_all(&self.results_dir)
            .await
            .map_err(|e| RunError::failed(RunStage::Assembling, e))?;
        let path = self.results_dir.join(format!("{job_id}.json"));
        let body = json!({
            "job_id": job_id,
            "kind": "training",
            "placeholder": true,
            "source_asset": asset.file_name().map(|n| n.to_string_lossy().into_owned()),
            "created_at": Utc::now(),
        });
        let bytes = serde_json::to_vec_pretty(&body)
            .map_err(|e| RunError::failed(RunStage::Assembling, AssembleError::from(e)))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| RunError::failed(RunStage::Assembling, e))?;

        tracing::info!(job_id = %job_id, path = %path.display(), "Training placeholder written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;
    use crate::progress::ProgressUpdate;

    #[derive(Default)]
    struct Recording {
        percents: Mutex<Vec<u8>>,
        cancel_at: Option<(u8, CancellationToken)>,
    }

    impl ProgressSink for Recording {
        fn report(&self, update: ProgressUpdate) {
            self.percents.lock().unwrap().push(update.percent);
            if let Some((at, token)) = &self.cancel_at {
                if update.percent == *at {
                    token.cancel();
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn walks_phases_and_writes_result() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TrainingRunner::new(dir.path());
        let sink = Recording::default();
        let job_id = uuid::Uuid::new_v4();

        let path = runner
            .run(job_id, Path::new("avatar.vrm"), &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*sink.percents.lock().unwrap(), vec![10, 30, 70]);
        let body: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(body["placeholder"], true);
        assert_eq!(body["source_asset"], "avatar.vrm");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_between_phases_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TrainingRunner::new(dir.path());
        let cancel = CancellationToken::new();
        let sink = Recording {
            cancel_at: Some((30, cancel.clone())),
            ..Default::default()
        };

        let result = runner
            .run(uuid::Uuid::new_v4(), Path::new("avatar.vrm"), &sink, &cancel)
            .await;

        assert_matches!(result, Err(RunError::Cancelled));
        assert_eq!(*sink.percents.lock().unwrap(), vec![10, 30]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
