//! Job registry and scheduler for shotforge.
//!
//! [`Scheduler`] accepts submissions, persists every job through a
//! [`JobRegistry`], and runs queued jobs on a bounded pool of worker roots,
//! each executing a [`JobRunner`] with its own cancellation token.

pub mod config;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod worker;

pub use config::{ConfigError, LogFormat, RenderBackend, WorkerConfig};
pub use queue::{JobQueue, QueueFull};
pub use registry::JobRegistry;
pub use scheduler::{
    prepare, CancelOutcome, RecoveryReport, Scheduler, SchedulerError, SchedulerOptions,
    INTERRUPTED_MESSAGE,
};
pub use worker::{JobRunner, CANCELLED_MESSAGE, SHUTDOWN_MESSAGE};
