//! Minimal W3C WebDriver client.
//!
//! Wraps the handful of WebDriver endpoints the viewer surface needs
//! (session lifecycle, navigation, element lookup and interaction, script
//! execution, element screenshots) using [`reqwest`].

use std::time::Duration;

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

/// Key under which W3C WebDriver returns element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a07b-4f52ea08bfd8";

/// HTTP client for one WebDriver endpoint (e.g. a chromedriver or
/// geckodriver instance).
#[derive(Debug, Clone)]
pub struct WebDriverClient {
    client: reqwest::Client,
    base_url: String,
}

/// An element reference inside a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(pub String);

/// Errors from the WebDriver layer.
#[derive(Debug, thiserror::Error)]
pub enum WebDriverError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The driver returned a non-2xx status with a W3C error body.
    #[error("WebDriver error ({status}) {error}: {message}")]
    Api {
        status: u16,
        /// W3C error code, e.g. `no such element`.
        error: String,
        message: String,
    },

    /// The driver answered with a body we did not expect.
    #[error("Unexpected WebDriver response: {0}")]
    Protocol(String),

    /// A screenshot was not valid base64.
    #[error("Invalid screenshot payload: {0}")]
    Screenshot(#[from] base64::DecodeError),
}

impl WebDriverError {
    /// Whether the driver could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_connect() || e.is_timeout())
    }

    /// Whether this is the W3C `no such element` error.
    pub fn is_no_such_element(&self) -> bool {
        matches!(self, Self::Api { error, .. } if error == "no such element")
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct NewSession {
    #[serde(rename = "sessionId")]
    session_id: String,
}

impl WebDriverClient {
    /// * `base_url` - WebDriver endpoint, e.g. `http://localhost:4444`.
    /// * `request_timeout` - ceiling on every request, so a wedged browser
    ///   never stalls a caller indefinitely.
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, WebDriverError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Start a browser session and return its id.
    pub async fn new_session(&self, capabilities: &Value) -> Result<String, WebDriverError> {
        let body = json!({ "capabilities": { "alwaysMatch": capabilities } });
        let response = self
            .client
            .post(format!("{}/session", self.base_url))
            .json(&body)
            .send()
            .await?;
        let created: NewSession = Self::parse_value(response).await?;
        Ok(created.session_id)
    }

    /// End a browser session.
    pub async fn delete_session(&self, session: &str) -> Result<(), WebDriverError> {
        let response = self
            .client
            .delete(self.session_url(session, ""))
            .send()
            .await?;
        Self::check_status(response).await
    }

    /// Navigate the session to `url`.
    pub async fn navigate(&self, session: &str, url: &str) -> Result<(), WebDriverError> {
        self.post_unit(session, "/url", &json!({ "url": url })).await
    }

    /// Find the first element matching a CSS selector, or `None`.
    pub async fn find_element(
        &self,
        session: &str,
        css: &str,
    ) -> Result<Option<ElementRef>, WebDriverError> {
        let body = json!({ "using": "css selector", "value": css });
        let response = self
            .client
            .post(self.session_url(session, "/element"))
            .json(&body)
            .send()
            .await?;
        match Self::parse_value::<Value>(response).await {
            Ok(value) => value
                .get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(|id| Some(ElementRef(id.to_string())))
                .ok_or_else(|| WebDriverError::Protocol(format!("no element reference in {value}"))),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Click an element.
    pub async fn click(&self, session: &str, element: &ElementRef) -> Result<(), WebDriverError> {
        let path = format!("/element/{}/click", element.0);
        self.post_unit(session, &path, &json!({})).await
    }

    /// Type text into an element. For file inputs this selects a file.
    pub async fn send_keys(
        &self,
        session: &str,
        element: &ElementRef,
        text: &str,
    ) -> Result<(), WebDriverError> {
        let path = format!("/element/{}/value", element.0);
        self.post_unit(session, &path, &json!({ "text": text })).await
    }

    /// Visible text of an element.
    pub async fn element_text(
        &self,
        session: &str,
        element: &ElementRef,
    ) -> Result<String, WebDriverError> {
        let response = self
            .client
            .get(self.session_url(session, &format!("/element/{}/text", element.0)))
            .send()
            .await?;
        Self::parse_value(response).await
    }

    /// Run a synchronous script in the page and return its result.
    pub async fn execute(
        &self,
        session: &str,
        script: &str,
        args: Vec<Value>,
    ) -> Result<Value, WebDriverError> {
        let body = json!({ "script": script, "args": args });
        let response = self
            .client
            .post(self.session_url(session, "/execute/sync"))
            .json(&body)
            .send()
            .await?;
        Self::parse_value(response).await
    }

    /// PNG screenshot of a single element.
    pub async fn element_screenshot(
        &self,
        session: &str,
        element: &ElementRef,
    ) -> Result<Vec<u8>, WebDriverError> {
        let response = self
            .client
            .get(self.session_url(session, &format!("/element/{}/screenshot", element.0)))
            .send()
            .await?;
        let encoded: String = Self::parse_value(response).await?;
        Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
    }

    // ---- private helpers ----

    fn session_url(&self, session: &str, path: &str) -> String {
        format!("{}/session/{}{}", self.base_url, session, path)
    }

    async fn post_unit(&self, session: &str, path: &str, body: &Value) -> Result<(), WebDriverError> {
        let response = self
            .client
            .post(self.session_url(session, path))
            .json(body)
            .send()
            .await?;
        Self::check_status(response).await
    }

    /// Ensure the response has a success status code. On failure the W3C
    /// error body is decoded when possible.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, WebDriverError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        let (error, message) = match serde_json::from_str::<Envelope<ErrorBody>>(&body) {
            Ok(envelope) => (envelope.value.error, envelope.value.message),
            Err(_) => ("unknown error".to_string(), body),
        };
        Err(WebDriverError::Api {
            status: status.as_u16(),
            error,
            message,
        })
    }

    /// Parse the `value` member of a successful response.
    async fn parse_value<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, WebDriverError> {
        let response = Self::ensure_success(response).await?;
        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.value)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), WebDriverError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
