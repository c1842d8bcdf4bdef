use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use shotforge_core::error::CoreError;
use shotforge_core::settings::{default_document, merge_parameters};

/// Which rendering surface jobs run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderBackend {
    /// The browser viewer, driven over WebDriver.
    WebDriver,
    /// The offline scripted surface.
    Scripted,
}

impl FromStr for RenderBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webdriver" => Ok(Self::WebDriver),
            "scripted" => Ok(Self::Scripted),
            other => Err(format!("expected `webdriver` or `scripted`, got `{other}`")),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected `text` or `json`, got `{other}`")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key} (`{value}`): {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Cannot load default settings from {path}: {reason}")]
    DefaultSettings { path: PathBuf, reason: String },

    #[error(transparent)]
    Builtin(#[from] CoreError),
}

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Root for `uploads/`, `temp/`, `datasets/` and `results/`.
    pub storage_dir: PathBuf,
    pub max_concurrent_jobs: usize,
    pub max_queued_jobs: usize,
    pub job_timeout: Duration,
    pub sweep_interval: Duration,
    pub shutdown_timeout: Duration,
    pub render_backend: RenderBackend,
    pub webdriver_url: String,
    pub viewer_url: String,
    pub session_open_timeout: Duration,
    pub max_upload_mb: u64,
    /// Optional JSON file merged over the built-in default settings.
    pub default_settings_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                     | Default                         |
    /// |-----------------------------|---------------------------------|
    /// | `DATABASE_URL`              | `sqlite://storage/shotforge.db` |
    /// | `STORAGE_DIR`               | `storage`                       |
    /// | `MAX_CONCURRENT_JOBS`       | `2`                             |
    /// | `MAX_QUEUED_JOBS`           | `64`                            |
    /// | `JOB_TIMEOUT_SECS`          | `3600`                          |
    /// | `QUEUE_SWEEP_INTERVAL_SECS` | `5`                             |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `30`                            |
    /// | `RENDER_BACKEND`            | `webdriver`                     |
    /// | `WEBDRIVER_URL`             | `http://localhost:4444`         |
    /// | `VIEWER_URL`                | `https://vrm-viewer.com`        |
    /// | `SESSION_OPEN_TIMEOUT_SECS` | `60`                            |
    /// | `MAX_UPLOAD_MB`             | `50`                            |
    /// | `DEFAULT_SETTINGS_PATH`     | unset                           |
    /// | `LOG_FORMAT`                | `text`                          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            database_url: string("DATABASE_URL", "sqlite://storage/shotforge.db"),
            storage_dir: PathBuf::from(string("STORAGE_DIR", "storage")),
            max_concurrent_jobs: parse_positive(&lookup, "MAX_CONCURRENT_JOBS", 2)?,
            max_queued_jobs: parse_positive(&lookup, "MAX_QUEUED_JOBS", 64)?,
            job_timeout: secs(parse_positive(&lookup, "JOB_TIMEOUT_SECS", 3600)?),
            sweep_interval: secs(parse_positive(&lookup, "QUEUE_SWEEP_INTERVAL_SECS", 5)?),
            shutdown_timeout: secs(parse(&lookup, "SHUTDOWN_TIMEOUT_SECS", 30)?),
            render_backend: parse(&lookup, "RENDER_BACKEND", RenderBackend::WebDriver)?,
            webdriver_url: string("WEBDRIVER_URL", "http://localhost:4444"),
            viewer_url: string("VIEWER_URL", "https://vrm-viewer.com"),
            session_open_timeout: secs(parse_positive(&lookup, "SESSION_OPEN_TIMEOUT_SECS", 60)?),
            max_upload_mb: parse_positive(&lookup, "MAX_UPLOAD_MB", 50)?,
            default_settings_path: lookup("DEFAULT_SETTINGS_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            log_format: parse(&lookup, "LOG_FORMAT", LogFormat::Text)?,
        })
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.storage_dir.join("uploads")
    }

    /// Parent of per-job working directories.
    pub fn temp_dir(&self) -> PathBuf {
        self.storage_dir.join("temp")
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.storage_dir.join("datasets")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.storage_dir.join("results")
    }

    /// The default settings document: the built-in one, with the file at
    /// `default_settings_path` merged over it when configured.
    pub fn load_default_settings(&self) -> Result<Value, ConfigError> {
        let builtin = default_document()?;
        match &self.default_settings_path {
            None => Ok(builtin),
            Some(path) => {
                let overrides = read_json(path)?;
                Ok(merge_parameters(&builtin, &overrides))
            }
        }
    }
}

fn read_json(path: &Path) -> Result<Value, ConfigError> {
    let fail = |reason: String| ConfigError::DefaultSettings {
        path: path.to_path_buf(),
        reason,
    };
    let body = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let value: Value = serde_json::from_str(&body).map_err(|e| fail(e.to_string()))?;
    if !value.is_object() {
        return Err(fail("expected a JSON object".to_string()));
    }
    Ok(value)
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let value = parse(lookup, key, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
