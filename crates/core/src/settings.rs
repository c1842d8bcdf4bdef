//! Dataset generation settings: the declarative configuration document,
//! default merging, validation, and cost estimation.
//!
//! Submissions carry a partial JSON document that is deep-merged over the
//! defaults (objects merge key by key, everything else replaces) before
//! being parsed into [`DatasetSettings`]. The merged document is what gets
//! persisted with the job and written into the dataset manifest.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::naming::{validate_template, DEFAULT_NAMING_FORMAT};
use crate::shots::{AngleRange, ShotPlan};

/// The built-in default configuration document.
const DEFAULT_DOCUMENT: &str = include_str!("dataset_defaults.json");

/// Assumed wall-clock cost of one shot, used for estimates.
pub const SECONDS_PER_SHOT: f64 = 0.5;

/// Largest accepted output width or height, in pixels.
pub const MAX_RESOLUTION: u32 = 4096;

/// Assumed PNG compression ratio relative to raw RGBA.
const COMPRESSION_RATIO: f64 = 0.5;

/// Fallback per-image size when the resolution cannot be parsed.
const FALLBACK_MB_PER_SHOT: f64 = 0.25;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Facet values used in minimal mode when the minimal block omits one.
const MINIMAL_EXPRESSIONS: [&str; 1] = ["Neutral"];
const MINIMAL_LIGHTING: [&str; 1] = ["Normal"];
const MINIMAL_DISTANCES: [&str; 2] = ["Mid-shot", "Close-up"];

// ---------------------------------------------------------------------------
// Default document and merging
// ---------------------------------------------------------------------------

/// Parse the built-in default configuration document.
pub fn default_document() -> Result<Value, CoreError> {
    serde_json::from_str(DEFAULT_DOCUMENT)
        .map_err(|e| CoreError::Validation(format!("Built-in dataset defaults are invalid: {e}")))
}

/// Deep-merge `overrides` over `defaults`.
///
/// Nested objects merge key by key; scalars and arrays in `overrides`
/// replace the default outright. A non-object `overrides` replaces the
/// whole document.
pub fn merge_parameters(defaults: &Value, overrides: &Value) -> Value {
    match (defaults, overrides) {
        (Value::Object(base), Value::Object(patch)) => {
            let mut merged = base.clone();
            for (key, value) in patch {
                let next = match merged.get(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_parameters(existing, value)
                    }
                    _ => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, Value::Null) => defaults.clone(),
        (_, other) => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Typed settings
// ---------------------------------------------------------------------------

/// Image encoding for captured shots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Webp,
}

impl OutputFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    /// Whether the encoding can carry an alpha channel.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, Self::Jpeg)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    pub format: OutputFormat,
    /// `"WIDTHxHEIGHT"`, e.g. `"512x512"`.
    pub resolution: String,
    /// Encoder quality, 1-100. Only lossy formats use it.
    pub quality: u8,
    /// `#RRGGBB` fill for transparent pixels.
    pub background: String,
}

impl OutputSettings {
    /// Parse `resolution` into `(width, height)`.
    pub fn dimensions(&self) -> Result<(u32, u32), CoreError> {
        parse_resolution(&self.resolution)
    }

    /// Parse `background` into RGB components.
    pub fn background_rgb(&self) -> Result<[u8; 3], CoreError> {
        parse_hex_colour(&self.background)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSettings {
    #[serde(default = "default_true")]
    pub include_params: bool,
    #[serde(default = "default_true")]
    pub timestamp: bool,
    #[serde(default = "default_naming_format")]
    pub naming_format: String,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            include_params: true,
            timestamp: true,
            naming_format: DEFAULT_NAMING_FORMAT.to_string(),
        }
    }
}

/// Reduced facet sets used when `use_minimal` is on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinimalConfig {
    pub expressions: Option<Vec<String>>,
    pub lighting: Option<Vec<String>>,
    pub camera_distance: Option<Vec<String>>,
}

/// Fully merged, validated dataset settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSettings {
    pub angle: AngleRange,
    pub expressions: Vec<String>,
    pub lighting: Vec<String>,
    pub camera_distance: Vec<String>,
    #[serde(default)]
    pub use_minimal: bool,
    #[serde(default)]
    pub minimal_config: Option<MinimalConfig>,
    pub output: OutputSettings,
    #[serde(default)]
    pub metadata: MetadataSettings,
}

/// Calculation-only summary of a configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetEstimate {
    pub total_shots: usize,
    pub estimated_size_mb: f64,
    pub estimated_time_minutes: f64,
}

impl DatasetSettings {
    /// Parse and validate a (merged) settings document.
    pub fn from_document(document: &Value) -> Result<Self, CoreError> {
        let settings: Self = serde_json::from_value(document.clone())
            .map_err(|e| CoreError::Validation(format!("Invalid dataset settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Merge `overrides` over `defaults`, then parse and validate.
    ///
    /// Returns both the typed settings and the merged document so callers
    /// can persist exactly what was validated.
    pub fn resolve(defaults: &Value, overrides: &Value) -> Result<(Self, Value), CoreError> {
        let merged = merge_parameters(defaults, overrides);
        let settings = Self::from_document(&merged)?;
        Ok((settings, merged))
    }

    /// Check every field for structural validity.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.angle.validate()?;
        self.shot_plan(self.use_minimal)?;
        self.shot_plan(false)?;

        let (width, height) = self.output.dimensions()?;
        if width == 0 || height == 0 {
            return Err(CoreError::Validation(format!(
                "Output resolution must be positive, got {width}x{height}"
            )));
        }
        if width > MAX_RESOLUTION || height > MAX_RESOLUTION {
            return Err(CoreError::Validation(format!(
                "Output resolution may not exceed {MAX_RESOLUTION} per side, got {width}x{height}"
            )));
        }
        if !(1..=100).contains(&self.output.quality) {
            return Err(CoreError::Validation(format!(
                "Output quality must be in 1-100, got {}",
                self.output.quality
            )));
        }
        self.output.background_rgb()?;
        validate_template(&self.metadata.naming_format)?;
        Ok(())
    }

    /// Build the shot plan, using the minimal facet sets when `minimal`
    /// is set and a minimal block is configured.
    pub fn shot_plan(&self, minimal: bool) -> Result<ShotPlan, CoreError> {
        match (minimal, &self.minimal_config) {
            (true, Some(reduced)) => ShotPlan::new(
                pick(&reduced.expressions, &MINIMAL_EXPRESSIONS),
                pick(&reduced.lighting, &MINIMAL_LIGHTING),
                pick(&reduced.camera_distance, &MINIMAL_DISTANCES),
                self.angle,
            ),
            _ => ShotPlan::new(
                self.expressions.clone(),
                self.lighting.clone(),
                self.camera_distance.clone(),
                self.angle,
            ),
        }
    }

    /// Shot count, archive size, and duration estimates for the plan
    /// this configuration would run.
    pub fn estimate(&self) -> Result<DatasetEstimate, CoreError> {
        let total_shots = self.shot_plan(self.use_minimal)?.total();
        let per_shot_mb = match self.output.dimensions() {
            Ok((w, h)) => f64::from(w) * f64::from(h) * 4.0 * COMPRESSION_RATIO / BYTES_PER_MB,
            Err(_) => FALLBACK_MB_PER_SHOT,
        };
        Ok(DatasetEstimate {
            total_shots,
            estimated_size_mb: round1(total_shots as f64 * per_shot_mb),
            estimated_time_minutes: round1(total_shots as f64 * SECONDS_PER_SHOT / 60.0),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_naming_format() -> String {
    DEFAULT_NAMING_FORMAT.to_string()
}

fn pick(configured: &Option<Vec<String>>, fallback: &[&str]) -> Vec<String> {
    match configured {
        Some(values) => values.clone(),
        None => fallback.iter().map(|v| v.to_string()).collect(),
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Parse `"WIDTHxHEIGHT"`.
pub fn parse_resolution(resolution: &str) -> Result<(u32, u32), CoreError> {
    let invalid = || {
        CoreError::Validation(format!(
            "Resolution must look like 512x512, got '{resolution}'"
        ))
    };
    let (w, h) = resolution
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(invalid)?;
    let width = w.trim().parse().map_err(|_| invalid())?;
    let height = h.trim().parse().map_err(|_| invalid())?;
    Ok((width, height))
}

/// Parse `#RRGGBB`.
pub fn parse_hex_colour(colour: &str) -> Result<[u8; 3], CoreError> {
    let invalid = || CoreError::Validation(format!("Colour must look like #FFFFFF, got '{colour}'"));
    let hex = colour.strip_prefix('#').ok_or_else(invalid)?;
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn built_in_defaults_are_valid() {
        let settings = DatasetSettings::from_document(&default_document().unwrap()).unwrap();
        assert_eq!(settings.angle, AngleRange { start: 0, end: 350, step: 10 });
        assert_eq!(settings.expressions.len(), 5);
        assert_eq!(settings.output.format, OutputFormat::Png);
        assert_eq!(settings.output.dimensions().unwrap(), (512, 512));
    }

    #[test]
    fn merge_replaces_scalars_and_arrays() {
        let defaults = json!({"expressions": ["A", "B"], "use_minimal": false});
        let merged = merge_parameters(&defaults, &json!({"expressions": ["C"], "use_minimal": true}));
        assert_eq!(merged, json!({"expressions": ["C"], "use_minimal": true}));
    }

    #[test]
    fn merge_nested_objects_key_by_key() {
        let defaults = json!({"output": {"format": "png", "quality": 90}, "keep": 1});
        let merged = merge_parameters(&defaults, &json!({"output": {"quality": 50}}));
        assert_eq!(
            merged,
            json!({"output": {"format": "png", "quality": 50}, "keep": 1})
        );
    }

    #[test]
    fn merge_adds_unknown_keys_and_ignores_null_patch() {
        let defaults = json!({"a": 1});
        assert_eq!(merge_parameters(&defaults, &json!({"b": 2})), json!({"a": 1, "b": 2}));
        assert_eq!(merge_parameters(&defaults, &Value::Null), defaults);
    }

    #[test]
    fn resolve_returns_the_merged_document() {
        let overrides = json!({
            "angle": {"start": 0, "end": 350, "step": 10},
            "expressions": ["Neutral"],
            "lighting": ["Normal"],
            "camera_distance": ["Mid-shot"]
        });
        let (settings, merged) = DatasetSettings::resolve(&default_document().unwrap(), &overrides).unwrap();
        assert_eq!(settings.shot_plan(false).unwrap().total(), 36);
        assert_eq!(merged["expressions"], json!(["Neutral"]));
        assert_eq!(merged["output"]["resolution"], "512x512");
    }

    #[test]
    fn minimal_mode_uses_reduced_sets() {
        let (settings, _) =
            DatasetSettings::resolve(&default_document().unwrap(), &json!({"use_minimal": true})).unwrap();
        let plan = settings.shot_plan(settings.use_minimal).unwrap();
        assert_eq!(plan.expressions(), ["Neutral".to_string()]);
        assert_eq!(plan.distances().len(), 2);
        assert_eq!(plan.total(), 36 * 2);
    }

    #[test]
    fn minimal_flag_without_block_falls_back_to_full_sets() {
        let mut doc = default_document().unwrap();
        doc["minimal_config"] = Value::Null;
        doc["use_minimal"] = json!(true);
        let settings = DatasetSettings::from_document(&doc).unwrap();
        assert_eq!(settings.shot_plan(true).unwrap().total(), 36 * 5 * 3 * 3);
    }

    #[test]
    fn rejects_out_of_range_angles() {
        let result = DatasetSettings::resolve(
            &default_document().unwrap(),
            &json!({"angle": {"start": 0, "end": 360, "step": 10}}),
        );
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("end"));
    }

    #[test]
    fn rejects_negative_angles_at_parse_time() {
        let result = DatasetSettings::resolve(
            &default_document().unwrap(),
            &json!({"angle": {"start": -10, "end": 350, "step": 10}}),
        );
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn rejects_empty_facet_lists() {
        let result = DatasetSettings::resolve(&default_document().unwrap(), &json!({"lighting": []}));
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("lighting"));
    }

    #[test]
    fn rejects_bad_output_block() {
        for patch in [
            json!({"output": {"resolution": "big"}}),
            json!({"output": {"resolution": "0x512"}}),
            json!({"output": {"quality": 0}}),
            json!({"output": {"background": "white"}}),
            json!({"output": {"format": "gif"}}),
            json!({"metadata": {"naming_format": "{pose}.png"}}),
        ] {
            let result = DatasetSettings::resolve(&default_document().unwrap(), &patch);
            assert_matches!(result, Err(CoreError::Validation(_)), "patch {patch}");
        }
    }

    #[test]
    fn resolution_is_capped_per_side() {
        for resolution in ["100000x100000", "4097x512", "512x4097"] {
            let result = DatasetSettings::resolve(
                &default_document().unwrap(),
                &json!({"output": {"resolution": resolution}}),
            );
            assert_matches!(
                result,
                Err(CoreError::Validation(msg)) if msg.contains("exceed"),
                "resolution {resolution}"
            );
        }
        let (settings, _) = DatasetSettings::resolve(
            &default_document().unwrap(),
            &json!({"output": {"resolution": "4096x4096"}}),
        )
        .unwrap();
        assert_eq!(settings.output.dimensions().unwrap(), (4096, 4096));
    }

    #[test]
    fn oversized_padding_is_rejected_at_submission() {
        let result = DatasetSettings::resolve(
            &default_document().unwrap(),
            &json!({"metadata": {"naming_format": "{angle:999999999}"}}),
        );
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn jpg_alias_is_accepted() {
        let (settings, _) =
            DatasetSettings::resolve(&default_document().unwrap(), &json!({"output": {"format": "jpg"}}))
                .unwrap();
        assert_eq!(settings.output.format, OutputFormat::Jpeg);
        assert_eq!(settings.output.format.extension(), "jpg");
        assert!(!settings.output.format.supports_alpha());
    }

    #[test]
    fn estimate_matches_reference_figures() {
        let (settings, _) = DatasetSettings::resolve(
            &default_document().unwrap(),
            &json!({
                "expressions": ["Neutral"],
                "lighting": ["Normal"],
                "camera_distance": ["Mid-shot"]
            }),
        )
        .unwrap();
        let estimate = settings.estimate().unwrap();
        assert_eq!(estimate.total_shots, 36);
        // 512 * 512 * 4 * 0.5 bytes = 0.5 MiB per shot.
        assert_eq!(estimate.estimated_size_mb, 18.0);
        // 36 shots * 0.5 s = 18 s = 0.3 min.
        assert_eq!(estimate.estimated_time_minutes, 0.3);
    }

    #[test]
    fn hex_colour_parsing() {
        assert_eq!(parse_hex_colour("#FF8000").unwrap(), [255, 128, 0]);
        assert_matches!(parse_hex_colour("FF8000"), Err(CoreError::Validation(_)));
        assert_matches!(parse_hex_colour("#GG0000"), Err(CoreError::Validation(_)));
    }
}
