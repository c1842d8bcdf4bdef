//! The seam between the capture driver and a concrete rendering surface.
//!
//! Surfaces know how to talk to one rendering technology. They do not
//! sleep between facets, cache state or post-process frames; the
//! [`CaptureDriver`](crate::CaptureDriver) layers that on top.

use std::fmt;
use std::future::Future;
use std::path::Path;

use shotforge_core::shots::ShotConfiguration;

use crate::error::{CaptureError, CloseError, ConfigurationError, SessionOpenError};

/// The four independently controllable aspects of a shot, in the order
/// they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    Expression,
    Lighting,
    Distance,
    Angle,
}

impl Facet {
    pub const ORDER: [Facet; 4] = [Self::Expression, Self::Lighting, Self::Distance, Self::Angle];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expression => "expression",
            Self::Lighting => "lighting",
            Self::Distance => "camera distance",
            Self::Angle => "angle",
        }
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One facet value to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetSetting<'a> {
    Expression(&'a str),
    Lighting(&'a str),
    Distance(&'a str),
    Angle(u32),
}

impl<'a> FacetSetting<'a> {
    /// Split a shot into its settings, in application order.
    pub fn from_shot(shot: &'a ShotConfiguration) -> [FacetSetting<'a>; 4] {
        [
            Self::Expression(&shot.expression),
            Self::Lighting(&shot.lighting),
            Self::Distance(&shot.distance),
            Self::Angle(shot.angle),
        ]
    }

    pub fn facet(&self) -> Facet {
        match self {
            Self::Expression(_) => Facet::Expression,
            Self::Lighting(_) => Facet::Lighting,
            Self::Distance(_) => Facet::Distance,
            Self::Angle(_) => Facet::Angle,
        }
    }

    /// The value as text, for logging and state comparison.
    pub fn value(&self) -> String {
        match self {
            Self::Expression(v) | Self::Lighting(v) | Self::Distance(v) => (*v).to_string(),
            Self::Angle(a) => a.to_string(),
        }
    }
}

/// Something that can open controllable rendering sessions.
pub trait RenderSurface: Send + Sync + 'static {
    type Session: RenderSession;

    /// Open a fresh session. No asset is loaded yet.
    fn open(&self) -> impl Future<Output = Result<Self::Session, SessionOpenError>> + Send;
}

/// A live, stateful connection to a rendering surface. Valid for one run.
pub trait RenderSession: Send + 'static {
    /// Load the avatar asset into the session.
    fn load_asset(
        &mut self,
        asset: &Path,
    ) -> impl Future<Output = Result<(), SessionOpenError>> + Send;

    /// Apply one facet value.
    fn apply(
        &mut self,
        setting: FacetSetting<'_>,
    ) -> impl Future<Output = Result<(), ConfigurationError>> + Send;

    /// Grab the current frame as encoded image bytes.
    fn capture_frame(&mut self) -> impl Future<Output = Result<Vec<u8>, CaptureError>> + Send;

    /// Release the session. Called at most once by the driver.
    fn close(&mut self) -> impl Future<Output = Result<(), CloseError>> + Send;
}
