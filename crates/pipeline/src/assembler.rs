//! Dataset assembly: working directory, manifest, and archive.
//!
//! Shots are written into `<temp_root>/<job_id>/` while a run captures.
//! On success the manifest is written next to them as `metadata.json` and
//! the directory is packaged into `<output_dir>/<job_id>.zip`; the working
//! directory is removed either way.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shotforge_core::shots::ShotConfiguration;
use shotforge_core::types::{JobId, Timestamp};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::AssembleError;
use crate::progress::CapturedShot;

/// Name of the manifest inside the working directory and the archive.
pub const MANIFEST_NAME: &str = "metadata.json";

/// Suffix of an archive that is still being written.
const PARTIAL_SUFFIX: &str = "partial";

/// One shot as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestShot {
    pub filename: String,
    #[serde(flatten)]
    pub configuration: ShotConfiguration,
    pub width: u32,
    pub height: u32,
}

/// The JSON document packaged with every dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub job_id: JobId,
    /// File name of the source asset.
    pub source_asset: String,
    /// Merged parameter document, when parameter inclusion is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Number of shots in the archive.
    pub total_shots: usize,
    /// Number of shots the plan enumerated.
    pub planned_shots: usize,
    /// Shots in capture order.
    pub shots: Vec<ManifestShot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

/// A packaged dataset.
#[derive(Debug, Clone)]
pub struct DatasetArchive {
    pub path: PathBuf,
    pub manifest: Manifest,
    pub size_bytes: u64,
}

/// What the manifest should say about the run.
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    pub source_asset: String,
    pub parameters: Option<Value>,
    pub include_timestamp: bool,
    pub planned_shots: usize,
}

/// Collects the shots of one run and packages them.
#[derive(Debug)]
pub struct DatasetAssembler {
    job_id: JobId,
    work_dir: PathBuf,
    output_dir: PathBuf,
    options: ManifestOptions,
    shots: Vec<ManifestShot>,
    names: HashSet<String>,
}

impl DatasetAssembler {
    /// Create a fresh working directory for `job_id` under `temp_root`.
    ///
    /// Leftovers from an interrupted earlier run of the same job are removed.
    pub async fn create(
        job_id: JobId,
        temp_root: &Path,
        output_dir: &Path,
        options: ManifestOptions,
    ) -> Result<Self, AssembleError> {
        let work_dir = temp_root.join(job_id.to_string());
        if tokio::fs::try_exists(&work_dir).await.unwrap_or(false) {
            tracing::warn!(job_id = %job_id, path = %work_dir.display(), "Removing stale working directory");
            tokio::fs::remove_dir_all(&work_dir)
                .await
                .map_err(|e| AssembleError::io("Failed to clear working directory", &work_dir, e))?;
        }
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| AssembleError::io("Failed to create working directory", &work_dir, e))?;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| AssembleError::io("Failed to create output directory", output_dir, e))?;

        Ok(Self {
            job_id,
            work_dir,
            output_dir: output_dir.to_path_buf(),
            options,
            shots: Vec::new(),
            names: HashSet::new(),
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Reserve `filename` in the working directory and return the name
    /// actually used and its full path.
    ///
    /// A name already taken by an earlier shot gets the shot position
    /// appended to its stem, so no capture overwrites another. Anything but
    /// a single plain path component is refused.
    pub fn reserve(
        &mut self,
        filename: &str,
        position: usize,
    ) -> Result<(String, PathBuf), AssembleError> {
        if !is_plain_file_name(filename) {
            return Err(AssembleError::UnsafeName(filename.to_string()));
        }
        let mut name = filename.to_string();
        if self.names.contains(&name) || name == MANIFEST_NAME {
            name = match filename.rsplit_once('.') {
                Some((stem, ext)) => format!("{stem}_{position}.{ext}"),
                None => format!("{filename}_{position}"),
            };
        }
        self.names.insert(name.clone());
        let path = self.work_dir.join(&name);
        Ok((name, path))
    }

    /// Record a captured shot for the manifest.
    pub fn add_shot(&mut self, shot: &CapturedShot) {
        self.shots.push(ManifestShot {
            filename: shot.filename.clone(),
            configuration: shot.configuration.clone(),
            width: shot.width,
            height: shot.height,
        });
    }

    pub fn shot_count(&self) -> usize {
        self.shots.len()
    }

    /// The manifest as it stands now.
    pub fn manifest(&self) -> Manifest {
        Manifest {
            job_id: self.job_id,
            source_asset: self.options.source_asset.clone(),
            parameters: self.options.parameters.clone(),
            total_shots: self.shots.len(),
            planned_shots: self.options.planned_shots,
            shots: self.shots.clone(),
            timestamp: self.options.include_timestamp.then(Utc::now),
        }
    }

    /// Write `metadata.json` into the working directory.
    pub async fn write_manifest(&self) -> Result<Manifest, AssembleError> {
        let manifest = self.manifest();
        let body = serde_json::to_vec_pretty(&manifest)?;
        let path = self.work_dir.join(MANIFEST_NAME);
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| AssembleError::io("Failed to write manifest", &path, e))?;
        Ok(manifest)
    }

    /// Package the manifest and every recorded shot into the archive and
    /// remove the working directory, whether or not packaging succeeded.
    ///
    /// The archive is written under a temporary name and renamed once
    /// complete, so a crash never leaves a truncated `<job_id>.zip`.
    pub async fn package(self, manifest: Manifest) -> Result<DatasetArchive, AssembleError> {
        let result = self.write_archive(&manifest).await;
        let job_id = self.job_id;
        self.discard().await;
        let (path, size_bytes) = result?;

        tracing::info!(
            job_id = %job_id,
            path = %path.display(),
            shots = manifest.total_shots,
            size_bytes,
            "Dataset archive written",
        );
        Ok(DatasetArchive {
            path,
            manifest,
            size_bytes,
        })
    }

    async fn write_archive(&self, manifest: &Manifest) -> Result<(PathBuf, u64), AssembleError> {
        let final_path = self.output_dir.join(format!("{}.zip", self.job_id));
        let partial_path = self.partial_path();

        let mut entries = Vec::with_capacity(manifest.shots.len() + 1);
        entries.push(MANIFEST_NAME.to_string());
        entries.extend(manifest.shots.iter().map(|s| s.filename.clone()));

        let work_dir = self.work_dir.clone();
        let target = partial_path.clone();
        tokio::task::spawn_blocking(move || zip_entries(&work_dir, &entries, &target))
            .await
            .map_err(|e| AssembleError::Task(e.to_string()))??;

        tokio::fs::rename(&partial_path, &final_path)
            .await
            .map_err(|e| AssembleError::io("Failed to finalise archive", &final_path, e))?;
        let size_bytes = tokio::fs::metadata(&final_path)
            .await
            .map_err(|e| AssembleError::io("Failed to stat archive", &final_path, e))?
            .len();
        Ok((final_path, size_bytes))
    }

    fn partial_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.zip.{PARTIAL_SUFFIX}", self.job_id))
    }

    /// Delete the working directory and any partial archive.
    ///
    /// Failures are logged, never returned.
    pub async fn discard(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    job_id = %self.job_id,
                    path = %self.work_dir.display(),
                    error = %e,
                    "Failed to remove working directory",
                );
            }
        }
        remove_quietly(&self.partial_path()).await;
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn zip_entries(work_dir: &Path, entries: &[String], target: &Path) -> Result<(), AssembleError> {
    let file = File::create(target).map_err(|e| AssembleError::io("Failed to create archive", target, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for name in entries {
        let source = work_dir.join(name);
        let mut input =
            File::open(&source).map_err(|e| AssembleError::io("Failed to read shot", &source, e))?;
        zip.start_file(name.as_str(), options)?;
        std::io::copy(&mut input, &mut zip)
            .map_err(|e| AssembleError::io("Failed to add shot to archive", &source, e))?;
    }

    let mut out = zip.finish()?;
    std::io::Write::flush(&mut out).map_err(|e| AssembleError::io("Failed to flush archive", target, e))?;
    Ok(())
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn options() -> ManifestOptions {
        ManifestOptions {
            source_asset: "avatar.vrm".into(),
            parameters: Some(json!({ "angle": { "start": 0, "end": 10, "step": 10 } })),
            include_timestamp: false,
            planned_shots: 2,
        }
    }

    fn shot(position: usize, filename: &str, path: PathBuf) -> CapturedShot {
        CapturedShot {
            position,
            filename: filename.into(),
            path,
            configuration: ShotConfiguration {
                expression: "Neutral".into(),
                lighting: "Normal".into(),
                distance: "Mid-shot".into(),
                angle: position as u32 * 10,
            },
            width: 8,
            height: 8,
        }
    }

    #[tokio::test]
    async fn package_contains_manifest_and_shots_only() {
        let root = tempfile::tempdir().unwrap();
        let job_id = uuid::Uuid::new_v4();
        let mut assembler =
            DatasetAssembler::create(job_id, &root.path().join("temp"), &root.path().join("out"), options())
                .await
                .unwrap();

        let (name, path) = assembler.reserve("a.png", 0).unwrap();
        tokio::fs::write(&path, b"first").await.unwrap();
        assembler.add_shot(&shot(0, &name, path));
        tokio::fs::write(assembler.work_dir().join("stray.tmp"), b"x").await.unwrap();

        let work_dir = assembler.work_dir().to_path_buf();
        let manifest = assembler.write_manifest().await.unwrap();
        let archive = assembler.package(manifest).await.unwrap();

        assert!(!work_dir.exists());
        assert_eq!(archive.path, root.path().join("out").join(format!("{job_id}.zip")));
        assert!(archive.size_bytes > 0);

        let mut zip = zip::ZipArchive::new(File::open(&archive.path).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["a.png".to_string(), MANIFEST_NAME.to_string()]);

        let mut body = String::new();
        zip.by_name(MANIFEST_NAME).unwrap().read_to_string(&mut body).unwrap();
        let parsed: Manifest = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed, archive.manifest);
        assert_eq!(parsed.total_shots, 1);
        assert_eq!(parsed.planned_shots, 2);
    }

    #[tokio::test]
    async fn manifest_shot_keys_are_flat() {
        let root = tempfile::tempdir().unwrap();
        let mut assembler =
            DatasetAssembler::create(uuid::Uuid::new_v4(), root.path(), root.path(), options())
                .await
                .unwrap();
        let (name, path) = assembler.reserve("a.png", 0).unwrap();
        assembler.add_shot(&shot(0, &name, path));

        let value = serde_json::to_value(assembler.manifest()).unwrap();
        let entry = value["shots"][0].as_object().unwrap();
        let mut keys: Vec<&str> = entry.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["angle", "camera_distance", "expression", "filename", "height", "lighting", "width"]
        );
        assert!(value.get("timestamp").is_none());
        assembler.discard().await;
    }

    #[tokio::test]
    async fn colliding_names_are_disambiguated() {
        let root = tempfile::tempdir().unwrap();
        let mut assembler =
            DatasetAssembler::create(uuid::Uuid::new_v4(), root.path(), root.path(), options())
                .await
                .unwrap();
        let (first, _) = assembler.reserve("shot.png", 0).unwrap();
        let (second, _) = assembler.reserve("shot.png", 7).unwrap();
        let (manifest_clash, _) = assembler.reserve(MANIFEST_NAME, 8).unwrap();
        assert_eq!(first, "shot.png");
        assert_eq!(second, "shot_7.png");
        assert_eq!(manifest_clash, "metadata_8.json");
        assembler.discard().await;
    }

    #[tokio::test]
    async fn names_outside_the_working_directory_are_refused() {
        let root = tempfile::tempdir().unwrap();
        let mut assembler =
            DatasetAssembler::create(uuid::Uuid::new_v4(), root.path(), root.path(), options())
                .await
                .unwrap();
        for name in ["../../escaped_0.png", "sub/a.png", "/tmp/a.png", "..", ".", ""] {
            assert_matches!(
                assembler.reserve(name, 0),
                Err(AssembleError::UnsafeName(n)) if n == name,
                "name {name}"
            );
        }
        assert!(assembler.reserve("..a.png", 1).is_ok());
        assembler.discard().await;
    }

    #[tokio::test]
    async fn discard_removes_working_directory() {
        let root = tempfile::tempdir().unwrap();
        let assembler =
            DatasetAssembler::create(uuid::Uuid::new_v4(), root.path(), &root.path().join("out"), options())
                .await
                .unwrap();
        let work_dir = assembler.work_dir().to_path_buf();
        tokio::fs::write(work_dir.join("x.png"), b"x").await.unwrap();

        assembler.discard().await;
        assert!(!work_dir.exists());
    }

    #[tokio::test]
    async fn stale_working_directory_is_replaced() {
        let root = tempfile::tempdir().unwrap();
        let job_id = uuid::Uuid::new_v4();
        let stale = root.path().join(job_id.to_string());
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("old.png"), b"old").unwrap();

        let assembler = DatasetAssembler::create(job_id, root.path(), root.path(), options())
            .await
            .unwrap();
        assert!(!assembler.work_dir().join("old.png").exists());
        assembler.discard().await;
    }
}
