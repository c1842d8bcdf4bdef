//! The capture session driver.
//!
//! [`CaptureDriver`] owns one [`RenderSession`] for the length of a run.
//! Facets are applied in a fixed order (expression, lighting, distance,
//! angle) with a fixed settle delay after each; a facet whose value did not
//! change since the previous shot is not re-sent. The first failing facet
//! stops the shot and forgets the cached state from that facet on, so the
//! next shot re-applies it.

use std::path::Path;
use std::time::Duration;

use shotforge_core::shots::ShotConfiguration;
use tokio_util::sync::CancellationToken;

use crate::error::{CaptureError, CloseError, ConfigurationError, SessionOpenError};
use crate::postprocess::{process_frame_blocking, FrameFormat};
use crate::retry::{open_with_retry, RetryConfig};
use crate::surface::{Facet, FacetSetting, RenderSession, RenderSurface};

/// Fixed waits between "facet applied" and "frame stable".
#[derive(Debug, Clone)]
pub struct SettleDelays {
    /// After an expression, lighting or distance change.
    pub facet: Duration,
    /// After an angle change.
    pub angle: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            facet: Duration::from_millis(500),
            angle: Duration::from_millis(200),
        }
    }
}

impl SettleDelays {
    /// No waiting at all, for offline surfaces.
    pub fn none() -> Self {
        Self {
            facet: Duration::ZERO,
            angle: Duration::ZERO,
        }
    }

    fn after(&self, facet: Facet) -> Duration {
        match facet {
            Facet::Angle => self.angle,
            _ => self.facet,
        }
    }
}

/// Timing configuration for a driver.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Budget for opening a session, retries included.
    pub open_timeout: Duration,
    /// Budget for loading the asset into an open session.
    pub load_timeout: Duration,
    /// Budget for sending one facet value.
    pub apply_timeout: Duration,
    /// Budget for grabbing one raw frame.
    pub capture_timeout: Duration,
    /// Budget for releasing the session.
    pub close_timeout: Duration,
    pub retry: RetryConfig,
    pub settle: SettleDelays,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(60),
            load_timeout: Duration::from_secs(30),
            apply_timeout: Duration::from_secs(15),
            capture_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            settle: SettleDelays::default(),
        }
    }
}

/// Result of [`CaptureDriver::apply_configuration`] when no facet failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every facet is in place.
    Applied,
    /// Cancellation was requested before a facet was sent.
    Cancelled,
}

/// Drives one rendering session through a dataset run.
///
/// Every call into the session is bounded by a timeout. A driver dropped
/// while its session is still open hands the session to a background task
/// that closes it.
pub struct CaptureDriver<S: RenderSession> {
    /// `None` once closed.
    session: Option<S>,
    options: DriverOptions,
    /// Last successfully applied value per facet, indexed by `Facet::index`.
    applied: [Option<String>; 4],
}

impl<S: RenderSession> CaptureDriver<S> {
    /// Open a session on `surface`, retrying while it is unreachable.
    pub async fn open<R>(surface: &R, options: DriverOptions) -> Result<Self, SessionOpenError>
    where
        R: RenderSurface<Session = S>,
    {
        let session = open_with_retry(surface, options.open_timeout, &options.retry).await?;
        tracing::debug!("Rendering session opened");
        Ok(Self {
            session: Some(session),
            options,
            applied: Default::default(),
        })
    }

    /// Bind the avatar asset to the open session.
    pub async fn load_asset(&mut self, asset: &Path) -> Result<(), SessionOpenError> {
        let Some(session) = self.session.as_mut() else {
            return Err(SessionOpenError::Surface("session is closed".to_string()));
        };
        let budget = self.options.load_timeout;
        match tokio::time::timeout(budget, session.load_asset(asset)).await {
            Ok(result) => result,
            Err(_) => Err(SessionOpenError::Timeout(budget)),
        }?;
        tracing::debug!(asset = %asset.display(), "Asset loaded");
        Ok(())
    }

    /// Apply every facet of `shot`, in order.
    ///
    /// `cancel` is checked before each facet is sent and observed while one
    /// is in flight. On a facet failure or timeout the remaining facets are
    /// not attempted.
    pub async fn apply_configuration(
        &mut self,
        shot: &ShotConfiguration,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome, ConfigurationError> {
        for setting in FacetSetting::from_shot(shot) {
            let facet = setting.facet();
            let value = setting.value();
            if self.applied[facet.index()].as_deref() == Some(value.as_str()) {
                continue;
            }
            if cancel.is_cancelled() {
                return Ok(ApplyOutcome::Cancelled);
            }

            let Some(session) = self.session.as_mut() else {
                return Err(ConfigurationError::new(facet, value, "session is closed"));
            };
            let budget = self.options.apply_timeout;
            let result = tokio::select! {
                () = cancel.cancelled() => None,
                result = tokio::time::timeout(budget, session.apply(setting)) => Some(result),
            };
            match result {
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    self.forget_from(facet);
                    return Err(e);
                }
                Some(Err(_)) => {
                    self.forget_from(facet);
                    return Err(ConfigurationError::new(
                        facet,
                        value,
                        format!("no answer within {budget:?}"),
                    ));
                }
                None => {
                    self.forget_from(facet);
                    return Ok(ApplyOutcome::Cancelled);
                }
            }
            tracing::debug!(facet = %facet, value = %value, "Facet applied");
            self.applied[facet.index()] = Some(value);

            let settle = self.options.settle.after(facet);
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
        }
        Ok(ApplyOutcome::Applied)
    }

    /// Capture the current frame, post-process it and write it to
    /// `destination`. Returns the written image's dimensions.
    ///
    /// A grab still pending when `cancel` fires is abandoned.
    pub async fn capture(
        &mut self,
        destination: &Path,
        format: &FrameFormat,
        cancel: &CancellationToken,
    ) -> Result<(u32, u32), CaptureError> {
        let Some(session) = self.session.as_mut() else {
            return Err(CaptureError::Closed);
        };
        let budget = self.options.capture_timeout;
        let raw = tokio::select! {
            () = cancel.cancelled() => return Err(CaptureError::Cancelled),
            result = tokio::time::timeout(budget, session.capture_frame()) => {
                result.map_err(|_| CaptureError::Timeout(budget))??
            }
        };
        let frame = process_frame_blocking(raw, *format).await?;
        tokio::fs::write(destination, &frame.bytes).await?;
        Ok((frame.width, frame.height))
    }

    /// Close the session. Later calls are no-ops.
    pub async fn close(&mut self) -> Result<(), CloseError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        self.applied = Default::default();
        let budget = self.options.close_timeout;
        let result = match tokio::time::timeout(budget, session.close()).await {
            Ok(result) => result,
            Err(_) => Err(CloseError(format!("no answer within {budget:?}"))),
        };
        tracing::debug!(ok = result.is_ok(), "Rendering session closed");
        result
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    fn forget_from(&mut self, facet: Facet) {
        for slot in &mut self.applied[facet.index()..] {
            *slot = None;
        }
    }
}

impl<S: RenderSession> Drop for CaptureDriver<S> {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("Capture driver dropped with a live rendering session");
            return;
        };
        tracing::warn!("Capture driver dropped with a live rendering session, closing it");
        let budget = self.options.close_timeout;
        runtime.spawn(async move {
            match tokio::time::timeout(budget, session.close()).await {
                Ok(Ok(())) => tracing::debug!("Abandoned rendering session closed"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to close abandoned session"),
                Err(_) => tracing::warn!("Abandoned session did not close in time"),
            }
        });
    }
}
