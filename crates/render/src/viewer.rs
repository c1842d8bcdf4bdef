//! Browser-based avatar viewer driven over WebDriver.
//!
//! The viewer page exposes one panel per facet. Each panel is opened with
//! its toggle button, an option is clicked, and the panel is closed again.
//! Rotation is a range input whose value is set from script. The rendered
//! avatar lives in the `.model-viewer` element, which is what gets
//! screenshotted.

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use crate::error::{CaptureError, CloseError, ConfigurationError, SessionOpenError};
use crate::surface::{Facet, FacetSetting, RenderSession, RenderSurface};
use crate::webdriver::{ElementRef, WebDriverClient, WebDriverError};

/// Element the page renders once the application has booted.
const APP_SELECTOR: &str = "#app";
const FILE_INPUT_SELECTOR: &str = "input[type=\"file\"]";
const LOADED_SELECTOR: &str = ".model-loaded";
const LOAD_ERROR_SELECTOR: &str = ".error-message";
const RENDER_REGION_SELECTOR: &str = ".model-viewer";

/// Pause between clicks inside a panel.
const PANEL_CLICK_DELAY: Duration = Duration::from_millis(500);

/// Default ceiling on each WebDriver request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval at which readiness selectors are polled.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

const ROTATE_SCRIPT: &str = "\
    const slider = document.querySelector('.rotation-slider');\
    if (!slider) { return false; }\
    slider.value = arguments[0];\
    slider.dispatchEvent(new Event('input', { bubbles: true }));\
    return true;";

/// A facet panel and the options it offers.
struct Panel {
    toggle: &'static str,
    close: &'static str,
    /// `(normalised value, option selector)` pairs.
    options: &'static [(&'static str, &'static str)],
    /// Option used when a value is not offered.
    fallback: &'static str,
}

const EXPRESSION_PANEL: Panel = Panel {
    toggle: ".expression-panel-button",
    close: ".expression-panel-close",
    options: &[
        ("neutral", ".expression-neutral"),
        ("happy", ".expression-happy"),
        ("sad", ".expression-sad"),
        ("angry", ".expression-angry"),
        ("surprised", ".expression-surprised"),
    ],
    fallback: ".expression-neutral",
};

const LIGHTING_PANEL: Panel = Panel {
    toggle: ".lighting-panel-button",
    close: ".lighting-panel-close",
    options: &[
        ("bright", ".lighting-bright"),
        ("normal", ".lighting-normal"),
        ("soft", ".lighting-soft"),
        ("dark", ".lighting-dark"),
        ("warm", ".lighting-warm"),
        ("cool", ".lighting-cool"),
    ],
    fallback: ".lighting-normal",
};

const CAMERA_PANEL: Panel = Panel {
    toggle: ".camera-panel-button",
    close: ".camera-panel-close",
    options: &[
        ("closeup", ".camera-closeup"),
        ("midshot", ".camera-midshot"),
        ("fullbody", ".camera-fullbody"),
    ],
    fallback: ".camera-midshot",
};

impl Panel {
    /// Selector for `value`, ignoring case, spaces, dashes and underscores.
    fn option_for(&self, value: &str) -> Option<&'static str> {
        let key: String = value
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        self.options
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, selector)| *selector)
    }
}

/// Where and how to reach the viewer.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// WebDriver endpoint.
    pub webdriver_url: String,
    /// Viewer page URL.
    pub viewer_url: String,
    /// Browser capabilities sent with each new session.
    pub capabilities: Value,
    /// Ceiling on each WebDriver request.
    pub request_timeout: Duration,
}

impl ViewerConfig {
    pub fn new(webdriver_url: impl Into<String>, viewer_url: impl Into<String>) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
            viewer_url: viewer_url.into(),
            capabilities: json!({
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "args": ["--headless=new", "--no-sandbox", "--window-size=1280,1024"]
                }
            }),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// [`RenderSurface`] backed by the web viewer.
#[derive(Debug, Clone)]
pub struct ViewerSurface {
    client: WebDriverClient,
    config: ViewerConfig,
    /// How long to wait for the page and the asset to become ready.
    ready_timeout: Duration,
}

impl ViewerSurface {
    pub fn new(config: ViewerConfig, ready_timeout: Duration) -> Result<Self, WebDriverError> {
        let client = WebDriverClient::new(config.webdriver_url.clone(), config.request_timeout)?;
        Ok(Self {
            client,
            config,
            ready_timeout,
        })
    }

    async fn boot(&self, session: &str) -> Result<(), SessionOpenError> {
        self.client
            .navigate(session, &self.config.viewer_url)
            .await
            .map_err(open_error)?;
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if self
                .client
                .find_element(session, APP_SELECTOR)
                .await
                .map_err(open_error)?
                .is_some()
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionOpenError::Timeout(self.ready_timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl RenderSurface for ViewerSurface {
    type Session = ViewerSession;

    async fn open(&self) -> Result<ViewerSession, SessionOpenError> {
        let session_id = self
            .client
            .new_session(&self.config.capabilities)
            .await
            .map_err(open_error)?;
        tracing::debug!(session_id = %session_id, url = %self.config.viewer_url, "Browser session started");

        if let Err(e) = self.boot(&session_id).await {
            if let Err(close) = self.client.delete_session(&session_id).await {
                tracing::warn!(session_id = %session_id, error = %close, "Failed to end browser session");
            }
            return Err(e);
        }

        Ok(ViewerSession {
            client: self.client.clone(),
            session_id,
            ready_timeout: self.ready_timeout,
        })
    }
}

/// One browser session showing the viewer.
#[derive(Debug)]
pub struct ViewerSession {
    client: WebDriverClient,
    session_id: String,
    ready_timeout: Duration,
}

impl ViewerSession {
    async fn require(&self, css: &str) -> Result<ElementRef, WebDriverError> {
        self.client
            .find_element(&self.session_id, css)
            .await?
            .ok_or_else(|| WebDriverError::Protocol(format!("element {css} not found")))
    }

    async fn click(&self, css: &str) -> Result<(), WebDriverError> {
        let element = self.require(css).await?;
        self.client.click(&self.session_id, &element).await
    }

    async fn choose(&self, panel: &Panel, facet: Facet, value: &str) -> Result<(), ConfigurationError> {
        let option = panel.option_for(value).unwrap_or_else(|| {
            tracing::warn!(facet = %facet, value, "Unknown option, using the default");
            panel.fallback
        });
        let fail = |e: WebDriverError| ConfigurationError::new(facet, value, e.to_string());

        self.click(panel.toggle).await.map_err(fail)?;
        tokio::time::sleep(PANEL_CLICK_DELAY).await;
        self.click(option).await.map_err(fail)?;
        tokio::time::sleep(PANEL_CLICK_DELAY).await;
        self.click(panel.close).await.map_err(fail)?;
        Ok(())
    }
}

impl RenderSession for ViewerSession {
    async fn load_asset(&mut self, asset: &Path) -> Result<(), SessionOpenError> {
        let path = tokio::fs::canonicalize(asset).await.map_err(|e| SessionOpenError::AssetLoad {
            path: asset.display().to_string(),
            reason: e.to_string(),
        })?;
        let input = self.require(FILE_INPUT_SELECTOR).await.map_err(open_error)?;
        self.client
            .send_keys(&self.session_id, &input, &path.to_string_lossy())
            .await
            .map_err(open_error)?;

        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if self
                .client
                .find_element(&self.session_id, LOADED_SELECTOR)
                .await
                .map_err(open_error)?
                .is_some()
            {
                return Ok(());
            }
            if let Some(element) = self
                .client
                .find_element(&self.session_id, LOAD_ERROR_SELECTOR)
                .await
                .map_err(open_error)?
            {
                let reason = self
                    .client
                    .element_text(&self.session_id, &element)
                    .await
                    .unwrap_or_else(|_| "viewer reported an error".to_string());
                return Err(SessionOpenError::AssetLoad {
                    path: asset.display().to_string(),
                    reason,
                });
            }
            if Instant::now() >= deadline {
                return Err(SessionOpenError::Timeout(self.ready_timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn apply(&mut self, setting: FacetSetting<'_>) -> Result<(), ConfigurationError> {
        match setting {
            FacetSetting::Expression(v) => self.choose(&EXPRESSION_PANEL, Facet::Expression, v).await,
            FacetSetting::Lighting(v) => self.choose(&LIGHTING_PANEL, Facet::Lighting, v).await,
            FacetSetting::Distance(v) => self.choose(&CAMERA_PANEL, Facet::Distance, v).await,
            FacetSetting::Angle(angle) => {
                let found = self
                    .client
                    .execute(&self.session_id, ROTATE_SCRIPT, vec![json!(angle)])
                    .await
                    .map_err(|e| ConfigurationError::new(Facet::Angle, angle.to_string(), e.to_string()))?;
                if found.as_bool() == Some(true) {
                    Ok(())
                } else {
                    Err(ConfigurationError::new(
                        Facet::Angle,
                        angle.to_string(),
                        "rotation slider not found",
                    ))
                }
            }
        }
    }

    async fn capture_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
        let region = self
            .client
            .find_element(&self.session_id, RENDER_REGION_SELECTOR)
            .await
            .map_err(|e| CaptureError::Surface(e.to_string()))?
            .ok_or(CaptureError::NoRenderRegion)?;
        self.client
            .element_screenshot(&self.session_id, &region)
            .await
            .map_err(|e| CaptureError::Surface(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), CloseError> {
        self.client
            .delete_session(&self.session_id)
            .await
            .map_err(|e| CloseError(e.to_string()))
    }
}

fn open_error(e: WebDriverError) -> SessionOpenError {
    if e.is_unreachable() {
        SessionOpenError::Unreachable(e.to_string())
    } else {
        SessionOpenError::Surface(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn options_match_loosely() {
        assert_eq!(CAMERA_PANEL.option_for("Close-up"), Some(".camera-closeup"));
        assert_eq!(CAMERA_PANEL.option_for("Mid-shot"), Some(".camera-midshot"));
        assert_eq!(CAMERA_PANEL.option_for("full_body"), Some(".camera-fullbody"));
        assert_eq!(EXPRESSION_PANEL.option_for("Surprised"), Some(".expression-surprised"));
        assert_eq!(LIGHTING_PANEL.option_for("WARM"), Some(".lighting-warm"));
    }

    #[test]
    fn unknown_options_have_no_selector() {
        assert_eq!(EXPRESSION_PANEL.option_for("Smug"), None);
        assert_eq!(LIGHTING_PANEL.option_for(""), None);
    }

    #[test]
    fn fallbacks_are_offered_options() {
        for panel in [&EXPRESSION_PANEL, &LIGHTING_PANEL, &CAMERA_PANEL] {
            assert!(panel.options.iter().any(|(_, sel)| *sel == panel.fallback));
        }
    }

    #[tokio::test]
    async fn unreachable_webdriver_fails_open_as_unreachable() {
        let surface = ViewerSurface::new(
            ViewerConfig::new("http://127.0.0.1:9", "https://viewer.invalid"),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_matches!(surface.open().await, Err(SessionOpenError::Unreachable(_)));
    }
}
