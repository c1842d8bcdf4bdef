//! Dataset generation: the engine that walks a shot plan through a
//! rendering session, the assembler that packages the results, and the
//! placeholder training runner.
//!
//! Both runners report through a [`ProgressSink`] and honour a
//! `CancellationToken`; neither touches persistence directly.

pub mod assembler;
pub mod engine;
pub mod error;
pub mod progress;
pub mod training;

pub use assembler::{DatasetArchive, DatasetAssembler, Manifest, ManifestOptions, ManifestShot};
pub use engine::{DatasetEngine, DatasetRequest, EngineConfig};
pub use error::{AssembleError, EngineError, RunError, RunFailure, ShotError};
pub use progress::{CapturedShot, ProgressSink, ProgressTracker, ProgressUpdate, RunStage};
pub use training::TrainingRunner;
