//! Error types for the capture session driver.

use std::time::Duration;

use crate::surface::Facet;

/// A session could not be opened, or the asset could not be bound to it.
#[derive(Debug, thiserror::Error)]
pub enum SessionOpenError {
    /// The rendering surface could not be reached at all.
    #[error("Rendering surface unreachable: {0}")]
    Unreachable(String),

    /// The surface answered but did not become ready in time.
    #[error("Session not ready within {0:?}")]
    Timeout(Duration),

    /// The surface refused to load the asset.
    #[error("Asset {path} failed to load: {reason}")]
    AssetLoad { path: String, reason: String },

    /// The surface answered with something unexpected.
    #[error("Session open failed: {0}")]
    Surface(String),
}

impl SessionOpenError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// One facet of a shot configuration could not be applied.
#[derive(Debug, thiserror::Error)]
#[error("Failed to apply {facet} '{value}': {reason}")]
pub struct ConfigurationError {
    pub facet: Facet,
    pub value: String,
    pub reason: String,
}

impl ConfigurationError {
    pub fn new(facet: Facet, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            facet,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// A frame could not be captured or made durable.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The surface has no renderable region to capture.
    #[error("No renderable region found")]
    NoRenderRegion,

    /// The surface failed while producing the frame.
    #[error("Capture failed: {0}")]
    Surface(String),

    #[error(transparent)]
    PostProcess(#[from] PostProcessError),

    #[error("Failed to write frame: {0}")]
    Io(#[from] std::io::Error),

    /// The surface did not hand over a frame in time.
    #[error("No frame within {0:?}")]
    Timeout(Duration),

    /// Cancellation was requested while the frame was pending.
    #[error("Capture cancelled")]
    Cancelled,

    /// The session was already closed.
    #[error("Session is closed")]
    Closed,
}

/// Closing a session failed. Logged by callers, never escalated.
#[derive(Debug, thiserror::Error)]
#[error("Failed to close session: {0}")]
pub struct CloseError(pub String);

/// Decoding, resizing or encoding a captured frame failed.
#[derive(Debug, thiserror::Error)]
pub enum PostProcessError {
    #[error("Failed to decode captured frame: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode frame: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Post-processing task failed: {0}")]
    Task(String),
}
