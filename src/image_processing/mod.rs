pub mod batch;
pub mod crop;
pub mod debug_overlay;
pub mod encode;
pub mod face_detection;
pub mod face_detection_stub;
pub mod orientation;
pub mod resize;
pub mod watermark;

use image::RgbImage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum_macros::{Display, EnumString};
use tracing::{debug, warn};

use crate::error::JobError;
use crate::identity::IdentityRecord;
use crate::organizer::{ensure_parent_dir, OutputLayout};
use crate::profile::ComplianceProfile;
use crate::utils::get_file_extension;

use batch::{BatchJob, JobOutcome, JobRunner};
use crop::plan_crop;
use encode::{encode_png, encode_with_budget};
use face_detection::{sort_by_confidence, FaceLocator, FacePolicy, FaceRegion};
use orientation::{apply_rotation, read_exif_orientation, ExifOrientation};
use watermark::Watermark;

/// Outcome class of one (record, profile) job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    /// No qualifying face; the centred fallback crop was written.
    FaceNotFoundFallback,
    /// Identity row rejected by the resolver; such rows never become jobs.
    ValidationFailed,
    BudgetUnmet,
    IoFailure,
    UnsupportedFormat,
    Cancelled,
    InternalFailure,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Success,
        JobStatus::FaceNotFoundFallback,
        JobStatus::ValidationFailed,
        JobStatus::BudgetUnmet,
        JobStatus::IoFailure,
        JobStatus::UnsupportedFormat,
        JobStatus::Cancelled,
        JobStatus::InternalFailure,
    ];

    /// An output file was produced.
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::FaceNotFoundFallback)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub record_key: String,
    pub profile: String,
    pub status: JobStatus,
    pub output_path: Option<PathBuf>,
    pub encoded_bytes: Option<u64>,
    pub quality: Option<u8>,
    pub detail: Option<String>,
}

impl ProcessingResult {
    pub fn failed(record_key: &str, profile: &str, status: JobStatus, detail: impl Into<String>) -> Self {
        Self {
            record_key: record_key.to_string(),
            profile: profile.to_string(),
            status,
            output_path: None,
            encoded_bytes: None,
            quality: None,
            detail: Some(detail.into()),
        }
    }

    /// For `BudgetUnmet`, `encoded_bytes` holds the smallest size reached.
    pub fn from_error(record_key: &str, profile: &str, error: &JobError) -> Self {
        Self {
            encoded_bytes: error.achieved_bytes(),
            ..Self::failed(record_key, profile, error.status(), error.to_string())
        }
    }

    pub fn cancelled(record_key: &str, profile: &str) -> Self {
        Self::failed(record_key, profile, JobStatus::Cancelled, "batch cancelled before dispatch")
    }
}

/// A decoded, upright source photo.
#[derive(Debug, Clone)]
pub struct PhotoAsset {
    pub path: PathBuf,
    pub image: RgbImage,
    pub orientation: ExifOrientation,
}

impl PhotoAsset {
    pub fn load(path: &Path) -> Result<Self, JobError> {
        let bytes = fs::read(path).map_err(|e| JobError::io(path, e))?;
        let decoded = image::load_from_memory(&bytes).map_err(|e| JobError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let orientation = read_exif_orientation(&bytes).unwrap_or(ExifOrientation::Undefined);
        if !matches!(orientation, ExifOrientation::Undefined | ExifOrientation::TopLeft) {
            debug!("{}: EXIF orientation {}", path.display(), orientation.description());
        }
        let image = apply_rotation(decoded.to_rgb8(), orientation);

        Ok(Self {
            path: path.to_path_buf(),
            image,
            orientation,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub layout: OutputLayout,
    pub face_policy: FacePolicy,
    /// Copy the untouched source into the renamed tier.
    pub copy_originals: bool,
    /// Write face/crop overlays under `debug/`.
    pub debug_overlays: bool,
    /// Plan and name outputs without encoding or writing anything.
    pub dry_run: bool,
    /// Stamped on every profile output before encoding.
    pub watermark: Option<Arc<Watermark>>,
}

/// Runs one batch job: decode, detect, then plan, render, encode and write per profile.
pub struct ProcessingEngine {
    config: ProcessingConfig,
    locator: Arc<dyn FaceLocator>,
}

impl ProcessingEngine {
    pub fn new(config: ProcessingConfig, locator: Arc<dyn FaceLocator>) -> Self {
        Self { config, locator }
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Primary face, or `None` with a note when detection failed.
    fn detect_primary(&self, asset: &PhotoAsset) -> (Option<FaceRegion>, Option<String>) {
        match self.locator.locate(&asset.image) {
            Ok(mut regions) => {
                sort_by_confidence(&mut regions);
                let primary = self
                    .config
                    .face_policy
                    .select_primary(&regions, asset.dimensions());
                debug!(
                    "{}: {} face(s) from {}, primary {:?}",
                    asset.path.display(),
                    regions.len(),
                    self.locator.name(),
                    primary
                );
                (primary, None)
            }
            Err(e) => {
                warn!("face detection failed for {}: {}", asset.path.display(), e);
                (None, Some(format!("face detection failed: {}", e)))
            }
        }
    }

    fn process_profile(
        &self,
        record: &IdentityRecord,
        asset: &PhotoAsset,
        face: Option<&FaceRegion>,
        profile: &ComplianceProfile,
    ) -> Result<ProcessingResult, JobError> {
        let plan = plan_crop(asset.dimensions(), face, profile);
        let status = if plan.face_used {
            JobStatus::Success
        } else {
            JobStatus::FaceNotFoundFallback
        };
        let output_path = self.config.layout.profile_output_path(record, profile);

        let mut result = ProcessingResult {
            record_key: record.key.clone(),
            profile: profile.name.clone(),
            status,
            output_path: Some(output_path.clone()),
            encoded_bytes: None,
            quality: None,
            detail: None,
        };

        if self.config.dry_run {
            return Ok(result);
        }

        let mut canvas =
            resize::render_plan(&asset.image, &plan).map_err(|e| JobError::Render(e.to_string()))?;
        if let Some(watermark) = &self.config.watermark {
            watermark.apply(&mut canvas);
        }
        let budget = profile.size_budget();
        let encoded = encode_with_budget(
            &canvas,
            profile.format,
            profile.dpi,
            profile.quality,
            budget,
        )?;
        write_atomic(&output_path, &encoded.bytes)?;

        result.encoded_bytes = Some(encoded.len());
        result.quality = encoded.quality;
        if encoded.undersized {
            let message = format!(
                "{} bytes is below the {} byte minimum",
                encoded.len(),
                budget.min.unwrap_or_default()
            );
            warn!("{} [{}]: {}", record.key, profile.name, message);
            result.detail = Some(message);
        }

        if self.config.debug_overlays {
            let overlay = debug_overlay::draw_overlay(&asset.image, face, &plan);
            let overlay_path = self.config.layout.debug_overlay_path(record, profile);
            if let Err(e) = encode_png(&overlay).and_then(|bytes| write_atomic(&overlay_path, &bytes)) {
                warn!("could not write debug overlay {}: {}", overlay_path.display(), e);
            }
        }

        Ok(result)
    }

    fn copy_original(&self, job: &BatchJob) -> Result<PathBuf, JobError> {
        let ext = get_file_extension(&job.photo).unwrap_or_else(|| "jpg".to_string());
        let dest = self.config.layout.renamed_original_path(&job.record, &ext);
        if !self.config.dry_run {
            let bytes = fs::read(&job.photo).map_err(|e| JobError::io(&job.photo, e))?;
            write_atomic(&dest, &bytes)?;
        }
        Ok(dest)
    }
}

impl JobRunner for ProcessingEngine {
    fn run_job(&self, job: &BatchJob) -> JobOutcome {
        let mut outcome = JobOutcome::new(job);

        let asset = match PhotoAsset::load(&job.photo) {
            Ok(asset) => asset,
            Err(e) => {
                debug!("{}: {}", job.photo.display(), e);
                outcome.results = job
                    .profiles
                    .iter()
                    .map(|p| ProcessingResult::from_error(&job.record.key, &p.name, &e))
                    .collect();
                return outcome;
            }
        };

        if self.config.copy_originals {
            match self.copy_original(job) {
                Ok(path) => outcome.original_copy = Some(path),
                Err(e) => {
                    warn!("could not copy original {}: {}", job.photo.display(), e);
                    outcome.notes.push(e.to_string());
                }
            }
        }

        let (primary, detection_note) = self.detect_primary(&asset);
        if let Some(note) = &detection_note {
            outcome.notes.push(note.clone());
        }

        for profile in job.profiles.iter() {
            let mut result = self
                .process_profile(&job.record, &asset, primary.as_ref(), profile)
                .unwrap_or_else(|e| ProcessingResult::from_error(&job.record.key, &profile.name, &e));
            if result.status == JobStatus::FaceNotFoundFallback {
                let reason = detection_note
                    .clone()
                    .unwrap_or_else(|| "no face above the confidence floor".to_string());
                result.detail = Some(match result.detail.take() {
                    Some(detail) => format!("{}; {}", reason, detail),
                    None => reason,
                });
            }
            outcome.results.push(result);
        }

        outcome
    }
}

/// Write through a `.part` file and rename, so readers never see a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), JobError> {
    ensure_parent_dir(path).map_err(|e| JobError::io(path, e))?;

    let mut part_name = path.file_name().unwrap_or_default().to_os_string();
    part_name.push(".part");
    let part_path = path.with_file_name(part_name);

    fs::write(&part_path, bytes).map_err(|e| {
        let _ = fs::remove_file(&part_path);
        JobError::io(&part_path, e)
    })?;
    fs::rename(&part_path, path).map_err(|e| {
        let _ = fs::remove_file(&part_path);
        JobError::io(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processing::face_detection_stub::{
        FailingFaceLocator, FixedFaceLocator, NullFaceLocator,
    };
    use crate::profile::ProfileCatalog;
    use image::{ImageBuffer, Rgb};
    use std::str::FromStr;

    fn portrait(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 251) as u8, (y % 241) as u8, ((x ^ y) % 239) as u8])
        })
    }

    fn record(key: &str) -> IdentityRecord {
        IdentityRecord {
            key: key.to_string(),
            naming_values: vec![key.to_string()],
            class_label: Some("10A".to_string()),
            national_id: None,
            match_token: None,
            row_index: 1,
        }
    }

    fn engine(root: &Path, locator: Arc<dyn FaceLocator>) -> ProcessingEngine {
        ProcessingEngine::new(
            ProcessingConfig {
                layout: OutputLayout::new(root, "run", false),
                face_policy: FacePolicy::default(),
                copy_originals: true,
                debug_overlays: true,
                dry_run: false,
                watermark: None,
            },
            locator,
        )
    }

    fn job(photo: PathBuf, profiles: &[&str]) -> BatchJob {
        let catalog = ProfileCatalog::builtin();
        let names: Vec<String> = profiles.iter().map(|p| p.to_string()).collect();
        BatchJob {
            index: 0,
            record: record("10A_12_Ali"),
            photo,
            profiles: catalog.select(&names).unwrap().into(),
        }
    }

    #[test]
    fn test_job_status_strings() {
        assert_eq!(JobStatus::FaceNotFoundFallback.to_string(), "face_not_found_fallback");
        assert_eq!(JobStatus::from_str("budget_unmet").unwrap(), JobStatus::BudgetUnmet);
        assert!(JobStatus::Success.is_success());
        assert!(!JobStatus::Cancelled.is_success());
    }

    #[test]
    fn test_run_job_with_face() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("in.png");
        portrait(1200, 1600).save(&photo).unwrap();

        let locator = Arc::new(FixedFaceLocator::new(vec![FaceRegion::new(400, 300, 300, 400, 0.9)]));
        let engine = engine(&dir.path().join("out"), locator);
        let outcome = engine.run_job(&job(photo, &["e_okul", "mebbis"]));

        assert_eq!(outcome.results.len(), 2);
        let e_okul = &outcome.results[0];
        assert_eq!(e_okul.status, JobStatus::Success);
        assert!(e_okul.encoded_bytes.unwrap() <= 150 * 1024);

        let path = e_okul.output_path.as_ref().unwrap();
        assert!(path.ends_with("run/E-Okul/10A_12_Ali.jpg"));
        let written = image::open(path).unwrap();
        assert_eq!((written.width(), written.height()), (551, 709));

        let mebbis = image::open(outcome.results[1].output_path.as_ref().unwrap()).unwrap();
        assert_eq!((mebbis.width(), mebbis.height()), (394, 512));

        assert!(outcome.original_copy.as_ref().unwrap().ends_with("run/renamed/10A_12_Ali.png"));
        assert!(dir.path().join("out/run/debug/E-Okul/10A_12_Ali.png").is_file());
        // No partial files left behind
        assert!(!dir.path().join("out/run/E-Okul/10A_12_Ali.jpg.part").exists());
    }

    #[test]
    fn test_run_job_without_face_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("in.png");
        portrait(600, 800).save(&photo).unwrap();

        let engine = engine(&dir.path().join("out"), Arc::new(NullFaceLocator));
        let outcome = engine.run_job(&job(photo, &["passport"]));
        let result = &outcome.results[0];
        assert_eq!(result.status, JobStatus::FaceNotFoundFallback);
        assert!(result.output_path.as_ref().unwrap().is_file());
        assert!(result.detail.is_some());
    }

    #[test]
    fn test_detector_failure_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("in.png");
        portrait(600, 800).save(&photo).unwrap();

        let engine = engine(&dir.path().join("out"), Arc::new(FailingFaceLocator::new("no model")));
        let outcome = engine.run_job(&job(photo, &["passport"]));
        assert_eq!(outcome.results[0].status, JobStatus::FaceNotFoundFallback);
        assert!(outcome.results[0].detail.as_ref().unwrap().contains("no model"));
        assert_eq!(outcome.notes.len(), 1);
    }

    #[test]
    fn test_load_failures_mark_every_profile() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir.path().join("out"), Arc::new(NullFaceLocator));

        let missing = engine.run_job(&job(dir.path().join("missing.jpg"), &["e_okul", "passport"]));
        assert_eq!(missing.results.len(), 2);
        assert!(missing.results.iter().all(|r| r.status == JobStatus::IoFailure));

        let garbage = dir.path().join("garbage.jpg");
        fs::write(&garbage, b"definitely not an image").unwrap();
        let outcome = engine.run_job(&job(garbage, &["e_okul"]));
        assert_eq!(outcome.results[0].status, JobStatus::UnsupportedFormat);
    }

    #[test]
    fn test_small_source_falls_back_and_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("small.png");
        portrait(180, 240).save(&photo).unwrap();

        let engine = engine(&dir.path().join("out"), Arc::new(NullFaceLocator));
        let outcome = engine.run_job(&job(photo, &["e_okul"]));
        let result = &outcome.results[0];
        assert_eq!(result.status, JobStatus::FaceNotFoundFallback);

        let written = image::open(result.output_path.as_ref().unwrap()).unwrap();
        assert_eq!((written.width(), written.height()), (551, 709));
    }

    #[test]
    fn test_budget_unmet_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("noisy.png");
        ImageBuffer::from_fn(1200, 1600, |x, y| {
            let v = x.wrapping_mul(7919) ^ y.wrapping_mul(104_729) ^ (x * y);
            Rgb([(v % 256) as u8, ((v >> 8) % 256) as u8, ((v >> 16) % 256) as u8])
        })
        .save(&photo)
        .unwrap();

        let tiny_budget = ComplianceProfile::from_definition(crate::profile::ProfileDefinition {
            name: "tiny".to_string(),
            width_px: Some(600),
            height_px: Some(800),
            max_kb: Some(1),
            ..Default::default()
        })
        .unwrap();
        let job = BatchJob {
            index: 0,
            record: record("10A_12_Ali"),
            photo,
            profiles: vec![tiny_budget].into(),
        };

        let out = dir.path().join("out");
        let mut engine = engine(&out, Arc::new(NullFaceLocator));
        engine.config.copy_originals = false;
        engine.config.debug_overlays = false;
        let outcome = engine.run_job(&job);

        let result = &outcome.results[0];
        assert_eq!(result.status, JobStatus::BudgetUnmet);
        assert_eq!(result.output_path, None);
        assert!(result.encoded_bytes.unwrap() > 1024);
        assert!(!out.join("run/tiny/10A_12_Ali.jpg").exists());
        assert!(!out.join("run/tiny/10A_12_Ali.jpg.part").exists());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("in.png");
        portrait(600, 800).save(&photo).unwrap();

        let mut engine = engine(&dir.path().join("out"), Arc::new(NullFaceLocator));
        engine.config.dry_run = true;
        let outcome = engine.run_job(&job(photo, &["e_okul"]));
        assert!(outcome.results[0].status.is_success());
        assert!(outcome.results[0].output_path.is_some());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.jpg");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("nested/out.jpg.part").exists());
    }
}
