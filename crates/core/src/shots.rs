//! Shot enumeration: the Cartesian product of facet values a dataset run
//! walks through.
//!
//! The nesting order is fixed (expression outermost, then lighting, then
//! camera distance, then angle innermost) because progress is reported by
//! position in this sequence. Totals are computed arithmetically; nothing
//! is materialised until a caller iterates.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Exclusive upper bound for angle values, in degrees.
pub const FULL_TURN_DEGREES: u32 = 360;

// ---------------------------------------------------------------------------
// Angle range
// ---------------------------------------------------------------------------

/// Inclusive stepped range of turntable angles, in degrees.
///
/// The end angle is always part of the sequence exactly once. When
/// `end - start` is not a whole number of steps, `end` follows the last
/// stepped value instead of being dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AngleRange {
    pub start: u32,
    pub end: u32,
    pub step: u32,
}

impl AngleRange {
    /// Build a validated range.
    pub fn new(start: u32, end: u32, step: u32) -> Result<Self, CoreError> {
        let range = Self { start, end, step };
        range.validate()?;
        Ok(range)
    }

    /// Check the range bounds.
    ///
    /// Rules:
    /// - `start` and `end` must lie in `0..360`.
    /// - `step` must lie in `1..360`.
    /// - `start` must not exceed `end`.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.start >= FULL_TURN_DEGREES {
            return Err(CoreError::Validation(format!(
                "Angle start must be in 0-359 degrees, got {}",
                self.start
            )));
        }
        if self.end >= FULL_TURN_DEGREES {
            return Err(CoreError::Validation(format!(
                "Angle end must be in 0-359 degrees, got {}",
                self.end
            )));
        }
        if self.step == 0 || self.step >= FULL_TURN_DEGREES {
            return Err(CoreError::Validation(format!(
                "Angle step must be in 1-359 degrees, got {}",
                self.step
            )));
        }
        if self.start > self.end {
            return Err(CoreError::Validation(format!(
                "Angle start ({}) must not exceed angle end ({})",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// Number of angles in the range, without iterating.
    pub fn count(&self) -> usize {
        if self.step == 0 || self.start > self.end {
            return 0;
        }
        let span = self.end - self.start;
        span.div_ceil(self.step) as usize + 1
    }

    /// The `index`-th angle, or `None` past the end.
    pub fn nth(&self, index: usize) -> Option<u32> {
        if index >= self.count() {
            return None;
        }
        let stepped = u64::from(self.start) + index as u64 * u64::from(self.step);
        Some(stepped.min(u64::from(self.end)) as u32)
    }

    /// Iterate the angles in ascending order.
    pub fn iter(&self) -> Angles {
        Angles {
            range: *self,
            next: 0,
        }
    }
}

/// Iterator over an [`AngleRange`].
#[derive(Debug, Clone)]
pub struct Angles {
    range: AngleRange,
    next: usize,
}

impl Iterator for Angles {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let angle = self.range.nth(self.next)?;
        self.next += 1;
        Some(angle)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.range.count().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Angles {}

// ---------------------------------------------------------------------------
// Shot configuration
// ---------------------------------------------------------------------------

/// One point in the capture parameter space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotConfiguration {
    pub expression: String,
    pub lighting: String,
    #[serde(rename = "camera_distance")]
    pub distance: String,
    pub angle: u32,
}

// ---------------------------------------------------------------------------
// Shot plan
// ---------------------------------------------------------------------------

/// The facet sets one dataset run enumerates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotPlan {
    expressions: Vec<String>,
    lighting: Vec<String>,
    distances: Vec<String>,
    angles: AngleRange,
}

impl ShotPlan {
    /// Build a plan, rejecting empty facet sets and invalid angle ranges.
    pub fn new(
        expressions: Vec<String>,
        lighting: Vec<String>,
        distances: Vec<String>,
        angles: AngleRange,
    ) -> Result<Self, CoreError> {
        angles.validate()?;
        for (name, values) in [
            ("expressions", &expressions),
            ("lighting", &lighting),
            ("camera_distance", &distances),
        ] {
            if values.is_empty() {
                return Err(CoreError::Validation(format!(
                    "At least one {name} value is required"
                )));
            }
        }
        Ok(Self {
            expressions,
            lighting,
            distances,
            angles,
        })
    }

    pub fn expressions(&self) -> &[String] {
        &self.expressions
    }

    pub fn lighting(&self) -> &[String] {
        &self.lighting
    }

    pub fn distances(&self) -> &[String] {
        &self.distances
    }

    pub fn angles(&self) -> AngleRange {
        self.angles
    }

    /// Total number of shots, computed in constant time.
    pub fn total(&self) -> usize {
        self.expressions.len() * self.lighting.len() * self.distances.len() * self.angles.count()
    }

    /// The shot at `position` in enumeration order.
    pub fn get(&self, position: usize) -> Option<ShotConfiguration> {
        if position >= self.total() {
            return None;
        }
        let angle_count = self.angles.count();
        let angle = self.angles.nth(position % angle_count)?;
        let rest = position / angle_count;
        let distance = &self.distances[rest % self.distances.len()];
        let rest = rest / self.distances.len();
        let lighting = &self.lighting[rest % self.lighting.len()];
        let expression = &self.expressions[rest / self.lighting.len()];

        Some(ShotConfiguration {
            expression: expression.clone(),
            lighting: lighting.clone(),
            distance: distance.clone(),
            angle,
        })
    }

    /// Iterate every shot from the beginning. Each call starts afresh.
    pub fn iter(&self) -> Shots<'_> {
        Shots {
            plan: self,
            next: 0,
        }
    }
}

/// Lazy iterator over a [`ShotPlan`].
#[derive(Debug, Clone)]
pub struct Shots<'a> {
    plan: &'a ShotPlan,
    next: usize,
}

impl Iterator for Shots<'_> {
    type Item = ShotConfiguration;

    fn next(&mut self) -> Option<ShotConfiguration> {
        let shot = self.plan.get(self.next)?;
        self.next += 1;
        Some(shot)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.total().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Shots<'_> {}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn full_turn_in_ten_degree_steps_has_36_angles() {
        let range = AngleRange::new(0, 350, 10).unwrap();
        assert_eq!(range.count(), 36);
        let angles: Vec<u32> = range.iter().collect();
        assert_eq!(angles.first(), Some(&0));
        assert_eq!(angles.last(), Some(&350));
        assert_eq!(angles.len(), 36);
    }

    #[test]
    fn whole_step_ranges_match_floor_formula() {
        for (start, end, step) in [(0, 350, 10), (10, 10, 5), (0, 359, 1), (90, 270, 45)] {
            let range = AngleRange::new(start, end, step).unwrap();
            let expected = ((end - start) / step + 1) as usize;
            assert_eq!(range.count(), expected, "{start}..={end} by {step}");
            assert_eq!(range.iter().filter(|a| *a == end).count(), 1);
        }
    }

    #[test]
    fn end_is_appended_once_when_not_on_a_step() {
        let range = AngleRange::new(0, 355, 10).unwrap();
        let angles: Vec<u32> = range.iter().collect();
        assert_eq!(angles.len(), range.count());
        assert_eq!(angles[angles.len() - 2], 350);
        assert_eq!(angles.last(), Some(&355));
        assert_eq!(angles.iter().filter(|a| **a == 355).count(), 1);
    }

    #[test]
    fn single_angle_range() {
        let range = AngleRange::new(45, 45, 30).unwrap();
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![45]);
    }

    #[test]
    fn step_larger_than_span_yields_start_and_end() {
        let range = AngleRange::new(0, 20, 90).unwrap();
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![0, 20]);
    }

    #[test]
    fn rejects_invalid_ranges() {
        assert_matches!(AngleRange::new(360, 0, 10), Err(CoreError::Validation(_)));
        assert_matches!(AngleRange::new(0, 360, 10), Err(CoreError::Validation(_)));
        assert_matches!(AngleRange::new(0, 350, 0), Err(CoreError::Validation(_)));
        assert_matches!(AngleRange::new(0, 350, 360), Err(CoreError::Validation(_)));
        assert_matches!(AngleRange::new(200, 100, 10), Err(CoreError::Validation(_)));
    }

    #[test]
    fn plan_total_is_product_of_facets() {
        let plan = ShotPlan::new(
            names(&["Neutral"]),
            names(&["Normal"]),
            names(&["Mid-shot"]),
            AngleRange::new(0, 350, 10).unwrap(),
        )
        .unwrap();
        assert_eq!(plan.total(), 36);
        assert_eq!(plan.iter().count(), 36);
        assert_eq!(plan.iter().len(), 36);
    }

    #[test]
    fn plan_nesting_order_is_expression_lighting_distance_angle() {
        let plan = ShotPlan::new(
            names(&["Neutral", "Happy"]),
            names(&["Bright", "Soft"]),
            names(&["Close-up", "Full-body"]),
            AngleRange::new(0, 90, 90).unwrap(),
        )
        .unwrap();

        let shots: Vec<ShotConfiguration> = plan.iter().collect();
        assert_eq!(shots.len(), 16);

        let key = |s: &ShotConfiguration| {
            (
                s.expression.clone(),
                s.lighting.clone(),
                s.distance.clone(),
                s.angle,
            )
        };
        assert_eq!(
            key(&shots[0]),
            ("Neutral".into(), "Bright".into(), "Close-up".into(), 0)
        );
        assert_eq!(
            key(&shots[1]),
            ("Neutral".into(), "Bright".into(), "Close-up".into(), 90)
        );
        assert_eq!(
            key(&shots[2]),
            ("Neutral".into(), "Bright".into(), "Full-body".into(), 0)
        );
        assert_eq!(
            key(&shots[4]),
            ("Neutral".into(), "Soft".into(), "Close-up".into(), 0)
        );
        assert_eq!(
            key(&shots[8]),
            ("Happy".into(), "Bright".into(), "Close-up".into(), 0)
        );
        assert_eq!(
            key(&shots[15]),
            ("Happy".into(), "Soft".into(), "Full-body".into(), 90)
        );
    }

    #[test]
    fn iteration_is_restartable() {
        let plan = ShotPlan::new(
            names(&["Neutral", "Sad"]),
            names(&["Normal"]),
            names(&["Mid-shot"]),
            AngleRange::new(0, 20, 10).unwrap(),
        )
        .unwrap();

        let mut first = plan.iter();
        first.next();
        first.next();
        let again: Vec<_> = plan.iter().collect();
        assert_eq!(again.len(), plan.total());
        assert_eq!(again[0].angle, 0);
        assert_eq!(plan.get(plan.total()), None);
    }

    #[test]
    fn empty_facet_set_is_rejected() {
        let result = ShotPlan::new(
            Vec::new(),
            names(&["Normal"]),
            names(&["Mid-shot"]),
            AngleRange::new(0, 10, 10).unwrap(),
        );
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("expressions"));
    }

    #[test]
    fn shot_configuration_serializes_distance_as_camera_distance() {
        let shot = ShotConfiguration {
            expression: "Happy".into(),
            lighting: "Warm".into(),
            distance: "Close-up".into(),
            angle: 30,
        };
        let json = serde_json::to_value(&shot).unwrap();
        assert_eq!(json["camera_distance"], "Close-up");
        assert!(json.get("distance").is_none());
    }
}
