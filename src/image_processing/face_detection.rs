//! Face location and primary face selection.

use image::RgbImage;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::DetectorError;

pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.5;

/// A detected face, in source pixel coordinates. Detectors may report boxes
/// that extend past the image edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

impl FaceRegion {
    pub fn new(x: i32, y: i32, width: u32, height: u32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Intersection with the image, or `None` if nothing is left.
    pub fn clip_to(&self, image_width: u32, image_height: u32) -> Option<FaceRegion> {
        let left = (self.x as i64).max(0);
        let top = (self.y as i64).max(0);
        let right = (self.x as i64 + self.width as i64).min(image_width as i64);
        let bottom = (self.y as i64 + self.height as i64).min(image_height as i64);
        if right <= left || bottom <= top {
            return None;
        }
        Some(FaceRegion {
            x: left as i32,
            y: top as i32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
            confidence: self.confidence,
        })
    }
}

/// Source of face candidates.
pub trait FaceLocator: Send + Sync {
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError>;

    fn name(&self) -> &str;
}

/// Chooses the one face a crop is planned around.
#[derive(Debug, Clone, Copy)]
pub struct FacePolicy {
    pub confidence_floor: f32,
}

impl Default for FacePolicy {
    fn default() -> Self {
        Self {
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
        }
    }
}

impl FacePolicy {
    /// Largest face at or above the confidence floor, after clipping to the image.
    /// Ties go to the higher confidence, then to the earlier region.
    pub fn select_primary(
        &self,
        regions: &[FaceRegion],
        (image_width, image_height): (u32, u32),
    ) -> Option<FaceRegion> {
        let mut best: Option<FaceRegion> = None;
        for region in regions {
            if !(region.confidence >= self.confidence_floor) {
                continue;
            }
            let Some(clipped) = region.clip_to(image_width, image_height) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some(current) => {
                    clipped.area() > current.area()
                        || (clipped.area() == current.area()
                            && clipped.confidence > current.confidence)
                }
            };
            if better {
                best = Some(clipped);
            }
        }
        best
    }
}

/// Order regions by confidence, highest first. Equal confidences keep their order.
pub fn sort_by_confidence(regions: &mut [FaceRegion]) {
    regions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}

#[derive(Debug, Deserialize)]
struct ScriptFace {
    #[serde(rename = "box")]
    bounding_box: [f64; 4],
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct ScriptOutput {
    #[serde(default)]
    faces: Vec<ScriptFace>,
    #[serde(default)]
    error: Option<String>,
}

/// Parse the detector program's JSON output.
pub fn parse_script_output(stdout: &str) -> Result<Vec<FaceRegion>, DetectorError> {
    let output: ScriptOutput = serde_json::from_str(stdout.trim())
        .map_err(|e| DetectorError::Malformed(format!("{} | Raw output: {}", e, stdout.trim())))?;

    if let Some(error) = output.error {
        return Err(DetectorError::Reported(error));
    }

    let mut regions = Vec::with_capacity(output.faces.len());
    for face in output.faces {
        let [x, y, w, h] = face.bounding_box;
        if !(x.is_finite() && y.is_finite() && w.is_finite() && h.is_finite()) || w < 0.0 || h < 0.0 {
            return Err(DetectorError::Malformed(format!(
                "invalid face box {:?}",
                face.bounding_box
            )));
        }
        regions.push(FaceRegion::new(
            x.round() as i32,
            y.round() as i32,
            w.round() as u32,
            h.round() as u32,
            face.confidence.clamp(0.0, 1.0),
        ));
    }
    sort_by_confidence(&mut regions);
    Ok(regions)
}

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Runs an external detector program on each image.
///
/// The program is invoked as `<program> --image <file.png> --output-format json`
/// (Python scripts through `python3`) and must print
/// `{"faces": [{"box": [x, y, w, h], "confidence": c}], "error": null}`.
pub struct ScriptFaceLocator {
    program: PathBuf,
}

impl ScriptFaceLocator {
    pub fn new(program: &Path) -> anyhow::Result<Self> {
        if !program.exists() {
            return Err(anyhow::anyhow!(
                "Face detector not found: {}",
                program.display()
            ));
        }
        Ok(Self {
            program: program.to_path_buf(),
        })
    }

    fn command(&self) -> Command {
        let is_python = self
            .program
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("py"));
        if is_python {
            let mut cmd = Command::new("python3");
            cmd.arg(&self.program);
            cmd
        } else {
            Command::new(&self.program)
        }
    }

    fn temp_image_path() -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("idphoto_face_{}_{}.png", std::process::id(), n))
    }

    fn run(&self, temp_path: &Path) -> Result<Vec<FaceRegion>, DetectorError> {
        let output = self
            .command()
            .arg("--image")
            .arg(temp_path)
            .arg("--output-format")
            .arg("json")
            .output()
            .map_err(|source| DetectorError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(DetectorError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_script_output(&String::from_utf8_lossy(&output.stdout))
    }
}

impl FaceLocator for ScriptFaceLocator {
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        let temp_path = Self::temp_image_path();
        image
            .save(&temp_path)
            .map_err(|e| DetectorError::Input(e.to_string()))?;

        let result = self.run(&temp_path);
        let _ = std::fs::remove_file(&temp_path);
        result
    }

    fn name(&self) -> &str {
        "script"
    }
}
