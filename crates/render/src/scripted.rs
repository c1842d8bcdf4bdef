//! Offline rendering surface producing solid-colour frames.
//!
//! Used for dry runs without a browser and throughout the test suites.
//! Behaviour is fully deterministic and failures can be injected at every
//! step of the session contract.

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Rgba, RgbaImage};

use crate::error::{CaptureError, CloseError, ConfigurationError, SessionOpenError};
use crate::surface::{Facet, FacetSetting, RenderSession, RenderSurface};

/// Failure injection and timing knobs for [`ScriptedSurface`].
#[derive(Debug, Clone)]
pub struct ScriptedBehavior {
    /// The first N open attempts report the surface as unreachable.
    pub unreachable_opens: u32,
    /// Time each open attempt takes.
    pub open_delay: Duration,
    /// Refuse every asset.
    pub reject_asset: bool,
    /// Facet values whose application fails.
    pub failing_values: Vec<String>,
    /// Time each facet application takes.
    pub apply_delay: Duration,
    /// Zero-based capture calls (across the session) that find no
    /// renderable region.
    pub failing_captures: Vec<usize>,
    /// Make `close` report an error (the session still counts as closed).
    pub fail_close: bool,
    /// Time each capture takes.
    pub capture_delay: Duration,
    /// Size of the raw frames before post-processing.
    pub frame_size: (u32, u32),
}

impl Default for ScriptedBehavior {
    fn default() -> Self {
        Self {
            unreachable_opens: 0,
            open_delay: Duration::ZERO,
            reject_asset: false,
            failing_values: Vec::new(),
            apply_delay: Duration::ZERO,
            failing_captures: Vec::new(),
            fail_close: false,
            capture_delay: Duration::ZERO,
            frame_size: (64, 64),
        }
    }
}

/// Counters shared by a surface and every session it opened.
#[derive(Debug, Default)]
pub struct ScriptedStats {
    open_attempts: AtomicUsize,
    sessions_opened: AtomicUsize,
    close_calls: AtomicUsize,
    captures: AtomicUsize,
    applied: Mutex<Vec<(Facet, String)>>,
}

impl ScriptedStats {
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    /// Every facet value actually sent to a session, in order.
    pub fn applied(&self) -> Vec<(Facet, String)> {
        self.applied.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Sessions opened but not yet closed.
    pub fn live_sessions(&self) -> usize {
        self.sessions_opened().saturating_sub(self.close_calls())
    }
}

/// Deterministic offline [`RenderSurface`].
#[derive(Debug, Clone)]
pub struct ScriptedSurface {
    behavior: Arc<ScriptedBehavior>,
    stats: Arc<ScriptedStats>,
}

impl Default for ScriptedSurface {
    fn default() -> Self {
        Self::new(ScriptedBehavior::default())
    }
}

impl ScriptedSurface {
    pub fn new(behavior: ScriptedBehavior) -> Self {
        Self {
            behavior: Arc::new(behavior),
            stats: Arc::new(ScriptedStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ScriptedStats> {
        Arc::clone(&self.stats)
    }
}

impl RenderSurface for ScriptedSurface {
    type Session = ScriptedSession;

    async fn open(&self) -> Result<ScriptedSession, SessionOpenError> {
        let attempt = self.stats.open_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.behavior.open_delay.is_zero() {
            tokio::time::sleep(self.behavior.open_delay).await;
        }
        if (attempt as u64) < u64::from(self.behavior.unreachable_opens) {
            return Err(SessionOpenError::Unreachable(format!(
                "scripted surface refused attempt {}",
                attempt + 1
            )));
        }
        self.stats.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSession {
            behavior: Arc::clone(&self.behavior),
            stats: Arc::clone(&self.stats),
            asset_loaded: false,
            captures: 0,
        })
    }
}

/// Session handed out by [`ScriptedSurface`].
#[derive(Debug)]
pub struct ScriptedSession {
    behavior: Arc<ScriptedBehavior>,
    stats: Arc<ScriptedStats>,
    asset_loaded: bool,
    captures: usize,
}

impl RenderSession for ScriptedSession {
    async fn load_asset(&mut self, asset: &Path) -> Result<(), SessionOpenError> {
        if self.behavior.reject_asset {
            return Err(SessionOpenError::AssetLoad {
                path: asset.display().to_string(),
                reason: "scripted rejection".to_string(),
            });
        }
        self.asset_loaded = true;
        Ok(())
    }

    async fn apply(&mut self, setting: FacetSetting<'_>) -> Result<(), ConfigurationError> {
        let value = setting.value();
        if !self.behavior.apply_delay.is_zero() {
            tokio::time::sleep(self.behavior.apply_delay).await;
        }
        if self.behavior.failing_values.contains(&value) {
            return Err(ConfigurationError::new(
                setting.facet(),
                value,
                "scripted facet failure",
            ));
        }
        if let Ok(mut log) = self.stats.applied.lock() {
            log.push((setting.facet(), value));
        }
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
        let index = self.captures;
        self.captures += 1;
        self.stats.captures.fetch_add(1, Ordering::SeqCst);

        if !self.behavior.capture_delay.is_zero() {
            tokio::time::sleep(self.behavior.capture_delay).await;
        }
        if !self.asset_loaded || self.behavior.failing_captures.contains(&index) {
            return Err(CaptureError::NoRenderRegion);
        }

        let (width, height) = self.behavior.frame_size;
        let shade = (index % 256) as u8;
        let frame = RgbaImage::from_pixel(width, height, Rgba([shade, 128, 255 - shade, 255]));
        let mut out = Cursor::new(Vec::new());
        frame
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| CaptureError::Surface(e.to_string()))?;
        Ok(out.into_inner())
    }

    async fn close(&mut self) -> Result<(), CloseError> {
        self.stats.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_close {
            return Err(CloseError("scripted close failure".to_string()));
        }
        Ok(())
    }
}
