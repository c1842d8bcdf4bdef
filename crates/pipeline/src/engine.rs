//! The dataset generation engine.
//!
//! One run walks a shot plan through a single rendering session:
//!
//! ```text
//! Initializing -> SessionOpen -> Capturing -> Assembling -> Completed
//!       \              \             \             \
//!        +--------------+-------------+-------------+--> Failed / Cancelled
//! ```
//!
//! Shots are strictly sequential. A shot whose facets cannot be applied or
//! whose frame cannot be captured is logged and skipped. Cancellation is
//! checked before each shot, before each facet is sent, and between
//! stages. The session is closed exactly once on every path out of
//! [`DatasetEngine::run`], and the working directory is removed unless an
//! archive was produced.

use std::path::{Path, PathBuf};

use serde_json::Value;
use shotforge_core::naming::render_shot_filename;
use shotforge_core::settings::DatasetSettings;
use shotforge_core::shots::{ShotConfiguration, ShotPlan};
use shotforge_core::types::JobId;
use shotforge_render::{ApplyOutcome, CaptureDriver, DriverOptions, FrameFormat, RenderSurface};
use tokio_util::sync::CancellationToken;

use crate::assembler::{DatasetArchive, DatasetAssembler, ManifestOptions};
use crate::error::{RunError, ShotError};
use crate::progress::{CapturedShot, ProgressSink, ProgressTracker, RunStage, ARCHIVE_PERCENT};

/// Where runs keep their files and how they drive sessions.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Parent of per-job working directories.
    pub temp_dir: PathBuf,
    /// Where finished archives are written.
    pub output_dir: PathBuf,
    pub driver: DriverOptions,
}

/// One dataset job, ready to run.
#[derive(Debug, Clone)]
pub struct DatasetRequest {
    pub job_id: JobId,
    pub asset: PathBuf,
    pub settings: DatasetSettings,
    /// The merged parameter document the settings were parsed from.
    pub parameters: Value,
}

impl DatasetRequest {
    /// Parse `parameters` (already merged with the defaults) into a request.
    pub fn new(job_id: JobId, asset: PathBuf, parameters: Value) -> Result<Self, RunError> {
        let settings = DatasetSettings::from_document(&parameters)
            .map_err(|e| RunError::failed(RunStage::Initializing, e))?;
        Ok(Self {
            job_id,
            asset,
            settings,
            parameters,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CaptureSummary {
    captured: usize,
    skipped: usize,
}

/// Runs dataset jobs against a [`RenderSurface`]. Each run opens its own
/// session, so one engine can serve concurrent jobs.
pub struct DatasetEngine<R: RenderSurface> {
    surface: R,
    config: EngineConfig,
}

impl<R: RenderSurface> DatasetEngine<R> {
    pub fn new(surface: R, config: EngineConfig) -> Self {
        Self { surface, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one dataset job to completion, failure or cancellation.
    pub async fn run(
        &self,
        request: &DatasetRequest,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DatasetArchive, RunError> {
        let job_id = request.job_id;
        let settings = &request.settings;
        let mut progress = ProgressTracker::new(sink);
        progress.enter(RunStage::Initializing, "Preparing dataset run");

        let plan = settings
            .shot_plan(settings.use_minimal)
            .map_err(|e| RunError::failed(RunStage::Initializing, e))?;
        let format = FrameFormat::from_settings(&settings.output)
            .map_err(|e| RunError::failed(RunStage::Initializing, e))?;
        tracing::info!(
            job_id = %job_id,
            asset = %request.asset.display(),
            total_shots = plan.total(),
            minimal = settings.use_minimal,
            "Dataset run started",
        );

        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let options = ManifestOptions {
            source_asset: asset_name(&request.asset),
            parameters: settings
                .metadata
                .include_params
                .then(|| request.parameters.clone()),
            include_timestamp: settings.metadata.timestamp,
            planned_shots: plan.total(),
        };
        let mut assembler =
            DatasetAssembler::create(job_id, &self.config.temp_dir, &self.config.output_dir, options)
                .await
                .map_err(|e| RunError::failed(RunStage::Initializing, e))?;

        let mut driver = match CaptureDriver::open(&self.surface, self.config.driver.clone()).await {
            Ok(driver) => driver,
            Err(e) => {
                assembler.discard().await;
                return Err(RunError::failed(RunStage::SessionOpen, e));
            }
        };
        progress.enter(RunStage::SessionOpen, "Rendering session open");

        let captured = self
            .capture_all(&mut driver, &mut assembler, request, &plan, &format, &mut progress, cancel)
            .await;

        if let Err(e) = driver.close().await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to close rendering session");
        }

        let summary = match captured {
            Ok(summary) => summary,
            Err(e) => {
                assembler.discard().await;
                return Err(e);
            }
        };
        tracing::info!(
            job_id = %job_id,
            captured = summary.captured,
            skipped = summary.skipped,
            "Capture finished",
        );

        if cancel.is_cancelled() {
            assembler.discard().await;
            return Err(RunError::Cancelled);
        }

        progress.enter(
            RunStage::Assembling,
            format!("Writing manifest for {} shots", summary.captured),
        );
        let manifest = match assembler.write_manifest().await {
            Ok(manifest) => manifest,
            Err(e) => {
                assembler.discard().await;
                return Err(RunError::failed(RunStage::Assembling, e));
            }
        };

        progress.set(ARCHIVE_PERCENT, "Packaging archive");
        let archive = assembler
            .package(manifest)
            .await
            .map_err(|e| RunError::failed(RunStage::Assembling, e))?;

        progress.enter(RunStage::Completed, "Dataset ready");
        Ok(archive)
    }

    #[allow(clippy::too_many_arguments)]
    async fn capture_all(
        &self,
        driver: &mut CaptureDriver<R::Session>,
        assembler: &mut DatasetAssembler,
        request: &DatasetRequest,
        plan: &ShotPlan,
        format: &FrameFormat,
        progress: &mut ProgressTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<CaptureSummary, RunError> {
        let job_id = request.job_id;
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        driver
            .load_asset(&request.asset)
            .await
            .map_err(|e| RunError::failed(RunStage::SessionOpen, e))?;

        let total = plan.total();
        progress.enter(RunStage::Capturing, format!("Capturing {total} shots"));

        let mut summary = CaptureSummary::default();
        for (position, shot) in plan.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(job_id = %job_id, shot = position, "Cancellation observed");
                return Err(RunError::Cancelled);
            }

            let template = &request.settings.metadata.naming_format;
            match capture_shot(driver, assembler, position, shot, template, format, cancel).await {
                Ok(Some(captured)) => {
                    assembler.add_shot(&captured);
                    progress.record_shot(&captured);
                    summary.captured += 1;
                }
                Ok(None) => {
                    tracing::info!(job_id = %job_id, shot = position, "Cancellation observed");
                    return Err(RunError::Cancelled);
                }
                Err(_) if cancel.is_cancelled() => {
                    tracing::info!(job_id = %job_id, shot = position, "Cancellation observed mid-shot");
                    return Err(RunError::Cancelled);
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, shot = position, error = %e, "Shot skipped");
                    summary.skipped += 1;
                }
            }

            progress.capture(
                position + 1,
                total,
                format!(
                    "Processed {} of {total} shots ({} captured)",
                    position + 1,
                    summary.captured
                ),
            );
        }
        Ok(summary)
    }
}

/// Apply and capture one shot. `Ok(None)` means cancellation was observed
/// while facets were being applied.
async fn capture_shot<S: shotforge_render::RenderSession>(
    driver: &mut CaptureDriver<S>,
    assembler: &mut DatasetAssembler,
    position: usize,
    shot: ShotConfiguration,
    template: &str,
    format: &FrameFormat,
    cancel: &CancellationToken,
) -> Result<Option<CapturedShot>, ShotError> {
    if driver.apply_configuration(&shot, cancel).await? == ApplyOutcome::Cancelled {
        return Ok(None);
    }

    let filename = render_shot_filename(template, &shot, format.extension())?;
    let (filename, path) = assembler.reserve(&filename, position)?;
    let (width, height) = driver.capture(&path, format, cancel).await?;
    tracing::debug!(shot = position, filename = %filename, "Shot captured");

    Ok(Some(CapturedShot {
        position,
        filename,
        path,
        configuration: shot,
        width,
        height,
    }))
}

fn asset_name(asset: &Path) -> String {
    asset
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| asset.display().to_string())
}
