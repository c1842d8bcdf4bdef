//! Capture session driver for controllable rendering surfaces.
//!
//! A [`RenderSurface`] opens [`RenderSession`]s; [`CaptureDriver`] wraps one
//! session with the capture contract the dataset engine relies on: bounded
//! open with retry, ordered facet application with fixed settle delays,
//! capture with deterministic post-processing, and idempotent close.
//!
//! Two surfaces ship with the crate:
//! - [`viewer::ViewerSurface`] drives the browser-based avatar viewer over
//!   the W3C WebDriver protocol ([`webdriver`]).
//! - [`scripted::ScriptedSurface`] renders solid frames offline, with
//!   failure injection for tests and dry runs.

pub mod driver;
pub mod error;
pub mod postprocess;
pub mod retry;
pub mod scripted;
pub mod surface;
pub mod viewer;
pub mod webdriver;

pub use driver::{ApplyOutcome, CaptureDriver, DriverOptions, SettleDelays};
pub use error::{CaptureError, CloseError, ConfigurationError, PostProcessError, SessionOpenError};
pub use postprocess::FrameFormat;
pub use surface::{Facet, FacetSetting, RenderSession, RenderSurface};
