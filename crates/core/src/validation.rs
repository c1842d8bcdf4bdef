//! Avatar asset checks performed before a job is accepted.

use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Default upload ceiling, in megabytes.
pub const DEFAULT_MAX_ASSET_MB: u64 = 50;

/// Files smaller than this cannot be a usable avatar.
pub const MIN_ASSET_BYTES: u64 = 1024;

/// Accepted avatar file extension.
pub const ASSET_EXTENSION: &str = "vrm";

/// Limits applied to submitted avatar assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPolicy {
    pub max_bytes: u64,
    pub min_bytes: u64,
    pub extension: String,
}

impl Default for AssetPolicy {
    fn default() -> Self {
        Self::with_max_mb(DEFAULT_MAX_ASSET_MB)
    }
}

impl AssetPolicy {
    pub fn with_max_mb(max_mb: u64) -> Self {
        Self {
            max_bytes: max_mb * 1024 * 1024,
            min_bytes: MIN_ASSET_BYTES,
            extension: ASSET_EXTENSION.to_string(),
        }
    }
}

/// A validated asset reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Check that `path` names an existing regular file with the expected
/// extension and a plausible size.
pub fn validate_asset(path: &Path, policy: &AssetPolicy) -> Result<AssetInfo, CoreError> {
    let display = path.display();

    let extension_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(&policy.extension));
    if !extension_ok {
        return Err(CoreError::Validation(format!(
            "Asset {display} must have a .{} extension",
            policy.extension
        )));
    }

    let metadata = std::fs::metadata(path).map_err(|e| {
        CoreError::Validation(format!("Asset {display} is not readable: {e}"))
    })?;
    if !metadata.is_file() {
        return Err(CoreError::Validation(format!(
            "Asset {display} is not a regular file"
        )));
    }

    let size_bytes = metadata.len();
    if size_bytes < policy.min_bytes {
        return Err(CoreError::Validation(format!(
            "Asset {display} is too small ({size_bytes} bytes) to be a valid avatar"
        )));
    }
    if size_bytes > policy.max_bytes {
        return Err(CoreError::Validation(format!(
            "Asset {display} is {size_bytes} bytes, above the {} byte limit",
            policy.max_bytes
        )));
    }

    Ok(AssetInfo {
        path: path.to_path_buf(),
        size_bytes,
    })
}
