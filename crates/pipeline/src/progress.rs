//! Run stages, progress arithmetic and the sink runs report into.
//!
//! Progress is a fixed base per stage plus, while capturing, a linear
//! share of the shots attempted so far:
//!
//! | Stage        | Percent |
//! |--------------|---------|
//! | Initializing | 1       |
//! | SessionOpen  | 5       |
//! | Capturing    | 10 → 90 |
//! | Assembling   | 92, 95  |
//! | Completed    | 100     |

use std::fmt;
use std::path::PathBuf;

use shotforge_core::shots::ShotConfiguration;

/// Where a dataset run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Initializing,
    SessionOpen,
    Capturing,
    Assembling,
    Completed,
}

/// Capture progress ends here; assembly picks up after it.
const CAPTURE_END: u8 = 90;

/// Progress once the manifest is written and archiving starts.
pub const ARCHIVE_PERCENT: u8 = 95;

impl RunStage {
    /// Progress percentage on entering the stage.
    pub fn base(self) -> u8 {
        match self {
            Self::Initializing => 1,
            Self::SessionOpen => 5,
            Self::Capturing => 10,
            Self::Assembling => 92,
            Self::Completed => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::SessionOpen => "session open",
            Self::Capturing => "capturing",
            Self::Assembling => "assembling",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percentage after `attempted` of `total` shots.
pub fn capture_percent(attempted: usize, total: usize) -> u8 {
    let base = RunStage::Capturing.base();
    if total == 0 {
        return CAPTURE_END;
    }
    let span = u64::from(CAPTURE_END - base);
    let done = attempted.min(total) as u64;
    base + (span * done / total as u64) as u8
}

/// One progress report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: String,
}

/// A shot that was captured and written to the working directory.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedShot {
    /// Position in enumeration order.
    pub position: usize,
    pub filename: String,
    pub path: PathBuf,
    pub configuration: ShotConfiguration,
    pub width: u32,
    pub height: u32,
}

/// Receives progress from a running job.
///
/// Calls are synchronous and must not block; implementations hand the
/// update off (e.g. to a channel) and return.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);

    /// Called once per successfully captured shot.
    fn record_shot(&self, _shot: &CapturedShot) {}
}

/// Forwards updates to a sink, never letting the percentage go down.
pub struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    last: u8,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self { sink, last: 0 }
    }

    /// Report entry into `stage`.
    pub fn enter(&mut self, stage: RunStage, message: impl Into<String>) {
        self.emit(stage.base(), message.into());
    }

    /// Report `attempted` of `total` shots done.
    pub fn capture(&mut self, attempted: usize, total: usize, message: impl Into<String>) {
        self.emit(capture_percent(attempted, total), message.into());
    }

    /// Report an explicit percentage.
    pub fn set(&mut self, percent: u8, message: impl Into<String>) {
        self.emit(percent.min(100), message.into());
    }

    /// Pass a captured shot through to the sink.
    pub fn record_shot(&self, shot: &CapturedShot) {
        self.sink.record_shot(shot);
    }

    pub fn last(&self) -> u8 {
        self.last
    }

    fn emit(&mut self, percent: u8, message: String) {
        let percent = percent.max(self.last);
        self.last = percent;
        self.sink.report(ProgressUpdate { percent, message });
    }
}
