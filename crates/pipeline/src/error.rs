//! Error types for dataset and training runs.

use std::backtrace::Backtrace;
use std::error::Error as _;
use std::path::PathBuf;

use shotforge_core::error::CoreError;
use shotforge_render::{CaptureError, ConfigurationError, SessionOpenError};

use crate::progress::RunStage;

/// Packaging the dataset failed.
#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("{context} ({path}): {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to serialize manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Archive task failed: {0}")]
    Task(String),

    /// A shot name that is not a single plain file name.
    #[error("Refusing to write shot outside the working directory: {0}")]
    UnsafeName(String),
}

impl AssembleError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

/// Why a single shot was skipped. Never fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum ShotError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("Cannot name shot: {0}")]
    Naming(#[from] CoreError),

    #[error(transparent)]
    Assemble(#[from] AssembleError),
}

/// Everything that can end a run unsuccessfully.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid dataset settings: {0}")]
    Settings(#[from] CoreError),

    #[error(transparent)]
    SessionOpen(#[from] SessionOpenError),

    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error("Failed to write result: {0}")]
    Io(#[from] std::io::Error),
}

/// A failed run, as recorded on the job.
#[derive(Debug, Clone)]
pub struct RunFailure {
    /// Stage the run was in when it failed.
    pub stage: RunStage,
    /// One line, shown to ordinary callers.
    pub summary: String,
    /// Full diagnostic trace, shown to operators.
    pub trace: String,
}

impl RunFailure {
    /// Build a failure from an error, capturing its source chain and the
    /// current backtrace verbatim.
    pub fn new(stage: RunStage, error: &EngineError) -> Self {
        let summary = format!("Run failed during {stage}: {error}");

        let mut trace = format!("{error:?}\n");
        let mut source = error.source();
        while let Some(cause) = source {
            trace.push_str(&format!("caused by: {cause}\n"));
            source = cause.source();
        }
        trace.push_str("\nbacktrace:\n");
        trace.push_str(&Backtrace::force_capture().to_string());

        Self {
            stage,
            summary,
            trace,
        }
    }

    /// A failure with no underlying error value.
    pub fn message(stage: RunStage, summary: impl Into<String>) -> Self {
        let summary = summary.into();
        Self {
            stage,
            trace: format!("{summary}\n\nbacktrace:\n{}", Backtrace::force_capture()),
            summary,
        }
    }
}

/// How a run ended when it did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Cancellation was requested and honoured. Not a fault.
    #[error("Run cancelled")]
    Cancelled,

    #[error("{}", .0.summary)]
    Failed(RunFailure),
}

impl RunError {
    pub fn failed(stage: RunStage, error: impl Into<EngineError>) -> Self {
        Self::Failed(RunFailure::new(stage, &error.into()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn failure_summary_names_stage_and_error() {
        let err = RunError::failed(
            RunStage::SessionOpen,
            SessionOpenError::Unreachable("connection refused".into()),
        );
        assert_matches!(err, RunError::Failed(ref f) if f.stage == RunStage::SessionOpen);
        let text = err.to_string();
        assert!(text.contains("session open"), "{text}");
        assert!(text.contains("connection refused"), "{text}");
    }

    #[test]
    fn trace_includes_source_chain_and_backtrace() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume");
        let failure = RunFailure::new(
            RunStage::Assembling,
            &EngineError::Assemble(AssembleError::io("Failed to create archive", "/tmp/x.zip", io)),
        );
        assert!(failure.trace.contains("caused by: read-only volume"), "{}", failure.trace);
        assert!(failure.trace.contains("backtrace:"));
        assert!(!failure.summary.contains('\n'));
    }
}
