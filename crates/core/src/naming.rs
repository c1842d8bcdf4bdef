//! Shot filename templates.
//!
//! Templates use brace placeholders with an optional integer format spec,
//! e.g. `shot_{expression}_{lighting}_{distance}_angle{angle:03d}.png`.
//! Recognised fields are `expression`, `lighting`, `distance` (alias
//! `camera_distance`) and `angle`. `{{` and `}}` produce literal braces.
//!
//! The rendered name always carries the extension of the configured output
//! format, whatever extension the template spells out.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;
use crate::shots::ShotConfiguration;

/// Template used when the settings document does not provide one.
pub const DEFAULT_NAMING_FORMAT: &str =
    "shot_{expression}_{lighting}_{distance}_angle{angle:03d}.png";

/// Extensions stripped from a rendered name before the output format's
/// extension is applied.
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Characters that would let a rendered name leave the working directory.
/// `:` covers drive prefixes.
const FORBIDDEN_IN_NAME: [char; 4] = ['/', '\\', ':', '\0'];

/// Widest zero or space padding accepted for `{angle}`.
pub const MAX_PAD_WIDTH: usize = 9;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_]+)(?::([^{}]*))?\}").expect("placeholder regex is valid")
});

static INT_SPEC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(0)?([0-9]*)d?$").expect("int spec regex is valid"));

/// Render the filename for one shot.
///
/// `extension` is the output format's extension without the dot.
///
/// # Examples
///
/// ```
/// use shotforge_core::naming::{render_shot_filename, DEFAULT_NAMING_FORMAT};
/// use shotforge_core::shots::ShotConfiguration;
///
/// let shot = ShotConfiguration {
///     expression: "Happy".into(),
///     lighting: "Soft".into(),
///     distance: "Close-up".into(),
///     angle: 10,
/// };
/// let name = render_shot_filename(DEFAULT_NAMING_FORMAT, &shot, "png").unwrap();
/// assert_eq!(name, "shot_Happy_Soft_Close-up_angle010.png");
/// ```
pub fn render_shot_filename(
    template: &str,
    shot: &ShotConfiguration,
    extension: &str,
) -> Result<String, CoreError> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        match whole.as_str() {
            "{{" => out.push('{'),
            "}}" => out.push('}'),
            _ => {
                let field = &caps[1];
                let spec = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                out.push_str(&render_field(field, spec, shot)?);
            }
        }
    }
    out.push_str(&template[last..]);

    if out.contains('{') || out.contains('}') {
        return Err(CoreError::Validation(format!(
            "Naming format has an unbalanced brace: {template}"
        )));
    }

    if let Some(bad) = out.chars().find(|c| FORBIDDEN_IN_NAME.contains(c)) {
        return Err(CoreError::Validation(format!(
            "Naming format must produce a plain file name, found {bad:?} in '{out}'"
        )));
    }

    let stem = strip_image_extension(&out);
    if stem.is_empty() || stem == "." || stem == ".." {
        return Err(CoreError::Validation(
            "Naming format renders an empty filename".to_string(),
        ));
    }
    Ok(format!("{stem}.{extension}"))
}

/// Check a template without a concrete shot, so bad templates are
/// rejected at submission rather than mid-run.
pub fn validate_template(template: &str) -> Result<(), CoreError> {
    let probe = ShotConfiguration {
        expression: "Neutral".to_string(),
        lighting: "Normal".to_string(),
        distance: "Mid-shot".to_string(),
        angle: 0,
    };
    render_shot_filename(template, &probe, "png").map(|_| ())
}

fn render_field(field: &str, spec: &str, shot: &ShotConfiguration) -> Result<String, CoreError> {
    match field {
        "expression" => text_field(field, spec, &shot.expression),
        "lighting" => text_field(field, spec, &shot.lighting),
        "distance" | "camera_distance" => text_field(field, spec, &shot.distance),
        "angle" => int_field(spec, shot.angle),
        other => Err(CoreError::Validation(format!(
            "Unknown naming placeholder '{{{other}}}'"
        ))),
    }
}

fn text_field(field: &str, spec: &str, value: &str) -> Result<String, CoreError> {
    if !(spec.is_empty() || spec == "s") {
        return Err(CoreError::Validation(format!(
            "Unsupported format spec '{spec}' for '{field}'"
        )));
    }
    Ok(sanitize_component(value))
}

fn int_field(spec: &str, value: u32) -> Result<String, CoreError> {
    let caps = INT_SPEC.captures(spec).ok_or_else(|| {
        CoreError::Validation(format!("Unsupported format spec '{spec}' for 'angle'"))
    })?;
    let zero_pad = caps.get(1).is_some();
    let width: usize = match caps.get(2).map(|m| m.as_str()).unwrap_or("") {
        "" => 0,
        digits => digits
            .parse()
            .map_err(|_| CoreError::Validation(format!("Invalid width in '{spec}'")))?,
    };
    if width > MAX_PAD_WIDTH {
        return Err(CoreError::Validation(format!(
            "Padding width in '{spec}' exceeds {MAX_PAD_WIDTH}"
        )));
    }

    Ok(if zero_pad {
        format!("{value:0width$}")
    } else {
        format!("{value:width$}")
    })
}

/// Keep facet values from escaping the working directory or producing
/// awkward names.
fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

fn strip_image_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => stem,
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn shot(angle: u32) -> ShotConfiguration {
        ShotConfiguration {
            expression: "Neutral".into(),
            lighting: "Normal".into(),
            distance: "Mid-shot".into(),
            angle,
        }
    }

    #[test]
    fn default_template() {
        let name = render_shot_filename(DEFAULT_NAMING_FORMAT, &shot(5), "png").unwrap();
        assert_eq!(name, "shot_Neutral_Normal_Mid-shot_angle005.png");
    }

    #[test]
    fn extension_follows_output_format() {
        let name = render_shot_filename(DEFAULT_NAMING_FORMAT, &shot(350), "jpg").unwrap();
        assert_eq!(name, "shot_Neutral_Normal_Mid-shot_angle350.jpg");
    }

    #[test]
    fn extension_is_appended_when_missing() {
        let name = render_shot_filename("{expression}-{angle}", &shot(40), "webp").unwrap();
        assert_eq!(name, "Neutral-40.webp");
    }

    #[test]
    fn camera_distance_alias() {
        let name = render_shot_filename("{camera_distance}_{angle:d}", &shot(7), "png").unwrap();
        assert_eq!(name, "Mid-shot_7.png");
    }

    #[test]
    fn space_padding_without_zero_flag() {
        let name = render_shot_filename("a{angle:4}", &shot(7), "png").unwrap();
        assert_eq!(name, "a   7.png");
    }

    #[test]
    fn literal_braces() {
        let name = render_shot_filename("{{x}}_{angle}", &shot(1), "png").unwrap();
        assert_eq!(name, "{x}_1.png");
    }

    #[test]
    fn path_separators_are_replaced() {
        let mut s = shot(0);
        s.expression = "../evil".into();
        s.lighting = "Warm light".into();
        let name = render_shot_filename("{expression}_{lighting}", &s, "png").unwrap();
        assert_eq!(name, ".._evil_Warm_light.png");
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        assert_matches!(
            validate_template("{mood}_{angle}.png"),
            Err(CoreError::Validation(msg)) if msg.contains("mood")
        );
    }

    #[test]
    fn bad_spec_is_rejected() {
        assert_matches!(validate_template("{angle:x}"), Err(CoreError::Validation(_)));
        assert_matches!(validate_template("{lighting:03d}"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn unbalanced_brace_is_rejected() {
        assert_matches!(validate_template("shot_{angle"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn templates_cannot_leave_the_working_directory() {
        for template in [
            "../../escaped_{angle}.png",
            "sub/{angle}.png",
            "/tmp/{angle}.png",
            "..\\{angle}.png",
            "C:{angle}.png",
        ] {
            assert_matches!(
                validate_template(template),
                Err(CoreError::Validation(_)),
                "template {template}"
            );
        }
        assert_matches!(validate_template(".."), Err(CoreError::Validation(_)));
    }

    #[test]
    fn dots_inside_a_name_are_fine() {
        let name = render_shot_filename("v1..{angle}", &shot(3), "png").unwrap();
        assert_eq!(name, "v1..3.png");
    }

    #[test]
    fn padding_width_is_capped() {
        assert_eq!(
            render_shot_filename("{angle:09d}", &shot(7), "png").unwrap(),
            "000000007.png"
        );
        assert_matches!(
            validate_template("{angle:999999999}"),
            Err(CoreError::Validation(msg)) if msg.contains("exceeds")
        );
        assert_matches!(validate_template("{angle:010d}"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn empty_name_is_rejected() {
        assert_matches!(validate_template(".png"), Err(CoreError::Validation(_)));
    }
}
