//! Compliance profile catalog.
//!
//! A profile names the required output geometry (pixel or physical size at a
//! DPI), byte budget and background policy of a standardized photo. Profiles
//! are plain data: the planner and encoder read them, they never branch on a
//! profile's name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ProfileError;
use crate::image_processing::encode::SizeBudget;

pub const MM_PER_INCH: f64 = 25.4;
pub const DEFAULT_DPI: u32 = 300;
pub const DEFAULT_QUALITY: u8 = 95;

const MIN_DPI: u32 = 72;
const MAX_DPI: u32 = 1200;
const MIN_PROFILE_QUALITY: u8 = 10;
const MIN_BUDGET_BYTES: u64 = 1024;
const MAX_MARGIN_RATIO: f64 = 3.0;
const MAX_PIXEL_SIDE: u32 = 10_000;
const RESERVED_FOLDERS: [&str; 2] = ["renamed", "debug"];

/// Convert a physical length to pixels, rounding half up.
///
/// Every derivation of a profile's pixel size goes through this function so
/// repeated runs always agree.
pub fn mm_to_px(mm: f64, dpi: u32) -> u32 {
    (mm / MM_PER_INCH * dpi as f64 + 0.5).floor() as u32
}

pub fn px_to_mm(px: u32, dpi: u32) -> f64 {
    px as f64 * MM_PER_INCH / dpi as f64
}

/// The authoritative size of a profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeSpec {
    Pixels { width: u32, height: u32 },
    Physical { width_mm: f64, height_mm: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundPolicy {
    #[default]
    None,
    Whiten,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

/// Face box expansion, as fractions of the face height (top, bottom) and width (side).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginRatios {
    pub top: f64,
    pub bottom: f64,
    pub side: f64,
}

impl Default for MarginRatios {
    fn default() -> Self {
        Self {
            top: 0.8,
            bottom: 0.4,
            side: 0.15,
        }
    }
}

/// A validated compliance profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplianceProfile {
    pub name: String,
    pub display_name: String,
    pub folder: String,
    pub size: SizeSpec,
    pub dpi: u32,
    pub max_encoded_bytes: Option<u64>,
    /// Outputs below this are kept but flagged.
    pub min_encoded_bytes: Option<u64>,
    pub background: BackgroundPolicy,
    pub aspect_lock: bool,
    pub margins: MarginRatios,
    pub format: OutputFormat,
    pub quality: u8,
}

/// Serialized form of a profile, as found in configuration files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub width_px: Option<u32>,
    #[serde(default)]
    pub height_px: Option<u32>,
    #[serde(default)]
    pub width_mm: Option<f64>,
    #[serde(default)]
    pub height_mm: Option<f64>,
    #[serde(default)]
    pub dpi: Option<u32>,
    #[serde(default)]
    pub max_kb: Option<u64>,
    #[serde(default)]
    pub min_kb: Option<u64>,
    #[serde(default)]
    pub background: Option<BackgroundPolicy>,
    #[serde(default)]
    pub aspect_lock: Option<bool>,
    #[serde(default)]
    pub margins: Option<MarginRatios>,
    #[serde(default)]
    pub format: Option<OutputFormat>,
    #[serde(default)]
    pub quality: Option<u8>,
}

impl ComplianceProfile {
    /// Validate a definition into a profile.
    pub fn from_definition(def: ProfileDefinition) -> Result<Self, ProfileError> {
        let name = def.name.trim().to_string();
        if name.is_empty() {
            return Err(ProfileError::EmptyName);
        }
        let invalid = |reason: String| ProfileError::Invalid {
            name: name.clone(),
            reason,
        };

        let dpi = def.dpi.unwrap_or(DEFAULT_DPI);
        if !(MIN_DPI..=MAX_DPI).contains(&dpi) {
            return Err(invalid(format!(
                "dpi {} outside {}..={}",
                dpi, MIN_DPI, MAX_DPI
            )));
        }

        let pixels = match (def.width_px, def.height_px) {
            (Some(w), Some(h)) => Some((w, h)),
            (None, None) => None,
            _ => return Err(invalid("width_px and height_px must be given together".into())),
        };
        let physical = match (def.width_mm, def.height_mm) {
            (Some(w), Some(h)) => Some((w, h)),
            (None, None) => None,
            _ => return Err(invalid("width_mm and height_mm must be given together".into())),
        };

        let size = match (pixels, physical) {
            (Some((w, h)), physical) => {
                if w == 0 || h == 0 || w > MAX_PIXEL_SIDE || h > MAX_PIXEL_SIDE {
                    return Err(invalid(format!("pixel size {}x{} out of range", w, h)));
                }
                if let Some((wmm, hmm)) = physical {
                    check_physical(&name, wmm, hmm)?;
                    for (px, mm) in [(w, wmm), (h, hmm)] {
                        let derived = mm_to_px(mm, dpi);
                        if px.abs_diff(derived) > 1 {
                            return Err(ProfileError::InconsistentSize {
                                name: name.clone(),
                                pixels: px,
                                derived,
                            });
                        }
                    }
                }
                SizeSpec::Pixels {
                    width: w,
                    height: h,
                }
            }
            (None, Some((wmm, hmm))) => {
                check_physical(&name, wmm, hmm)?;
                let (w, h) = (mm_to_px(wmm, dpi), mm_to_px(hmm, dpi));
                if w == 0 || h == 0 || w > MAX_PIXEL_SIDE || h > MAX_PIXEL_SIDE {
                    return Err(invalid(format!(
                        "{}x{} mm at {} dpi derives {}x{} px",
                        wmm, hmm, dpi, w, h
                    )));
                }
                SizeSpec::Physical {
                    width_mm: wmm,
                    height_mm: hmm,
                }
            }
            (None, None) => {
                return Err(invalid(
                    "either width_px/height_px or width_mm/height_mm is required".into(),
                ))
            }
        };

        let to_bytes = |label: &str, kb: u64| {
            kb.checked_mul(1024)
                .ok_or_else(|| invalid(format!("{} {} is too large", label, kb)))
        };
        let max_encoded_bytes = def.max_kb.map(|kb| to_bytes("max_kb", kb)).transpose()?;
        if let Some(bytes) = max_encoded_bytes {
            if bytes < MIN_BUDGET_BYTES {
                return Err(invalid("max_kb must be at least 1".into()));
            }
        }
        let min_encoded_bytes = def.min_kb.map(|kb| to_bytes("min_kb", kb)).transpose()?;
        if let (Some(min), Some(max)) = (min_encoded_bytes, max_encoded_bytes) {
            if min > max {
                return Err(invalid("min_kb must not exceed max_kb".into()));
            }
        }

        let quality = def.quality.unwrap_or(DEFAULT_QUALITY);
        if !(MIN_PROFILE_QUALITY..=100).contains(&quality) {
            return Err(invalid(format!("quality {} outside 10..=100", quality)));
        }

        let margins = def.margins.unwrap_or_default();
        for (label, value) in [
            ("top", margins.top),
            ("bottom", margins.bottom),
            ("side", margins.side),
        ] {
            if !value.is_finite() || !(0.0..=MAX_MARGIN_RATIO).contains(&value) {
                return Err(invalid(format!(
                    "{} margin {} outside 0..={}",
                    label, value, MAX_MARGIN_RATIO
                )));
            }
        }

        let background = def.background.unwrap_or_default();
        let aspect_lock = def.aspect_lock.unwrap_or(true);
        if !aspect_lock && background != BackgroundPolicy::Whiten {
            return Err(invalid(
                "profiles without aspect_lock must use background \"whiten\"".into(),
            ));
        }

        let folder = def.folder.unwrap_or_else(|| name.clone());
        if folder.trim().is_empty() || folder.contains(['/', '\\']) || folder == ".." {
            return Err(invalid(format!("folder '{}' is not a plain directory name", folder)));
        }
        if RESERVED_FOLDERS
            .iter()
            .any(|reserved| folder.eq_ignore_ascii_case(reserved))
        {
            return Err(invalid(format!("folder '{}' is reserved", folder)));
        }

        Ok(Self {
            display_name: def.display_name.unwrap_or_else(|| name.clone()),
            folder,
            size,
            dpi,
            max_encoded_bytes,
            min_encoded_bytes,
            background,
            aspect_lock,
            margins,
            format: def.format.unwrap_or_default(),
            quality,
            name,
        })
    }

    /// Destination canvas size in pixels.
    pub fn pixel_size(&self) -> (u32, u32) {
        match self.size {
            SizeSpec::Pixels { width, height } => (width, height),
            SizeSpec::Physical {
                width_mm,
                height_mm,
            } => (mm_to_px(width_mm, self.dpi), mm_to_px(height_mm, self.dpi)),
        }
    }

    /// Printed size in millimetres at the profile DPI.
    pub fn physical_size_mm(&self) -> (f64, f64) {
        match self.size {
            SizeSpec::Physical {
                width_mm,
                height_mm,
            } => (width_mm, height_mm),
            SizeSpec::Pixels { width, height } => {
                (px_to_mm(width, self.dpi), px_to_mm(height, self.dpi))
            }
        }
    }

    pub fn size_budget(&self) -> SizeBudget {
        SizeBudget {
            min: self.min_encoded_bytes,
            max: self.max_encoded_bytes,
        }
    }

    /// Target width / height ratio of the canvas.
    pub fn aspect_ratio(&self) -> f64 {
        let (w, h) = self.pixel_size();
        w as f64 / h as f64
    }

    pub fn describe(&self) -> String {
        let (w, h) = self.pixel_size();
        let (wmm, hmm) = self.physical_size_mm();
        let budget = match (self.min_encoded_bytes, self.max_encoded_bytes) {
            (Some(min), Some(max)) => format!("{}-{} KB", min / 1024, max / 1024),
            (None, Some(max)) => format!("max {} KB", max / 1024),
            (Some(min), None) => format!("min {} KB", min / 1024),
            (None, None) => "no size limit".to_string(),
        };
        format!(
            "{}x{} px ({:.1}x{:.1} mm @ {} dpi), {}",
            w, h, wmm, hmm, self.dpi, budget
        )
    }
}

fn check_physical(name: &str, width_mm: f64, height_mm: f64) -> Result<(), ProfileError> {
    if !(width_mm.is_finite() && height_mm.is_finite() && width_mm > 0.0 && height_mm > 0.0) {
        return Err(ProfileError::Invalid {
            name: name.to_string(),
            reason: format!("physical size {}x{} mm must be positive", width_mm, height_mm),
        });
    }
    Ok(())
}

/// Named set of profiles. Lookups are by exact name.
#[derive(Debug, Clone, Default)]
pub struct ProfileCatalog {
    profiles: BTreeMap<String, ComplianceProfile>,
}

impl ProfileCatalog {
    /// The profiles shipped with the tool.
    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        for def in builtin_definitions() {
            // Built-in definitions are covered by tests; a failure here is a bug.
            if let Ok(profile) = ComplianceProfile::from_definition(def) {
                catalog.profiles.insert(profile.name.clone(), profile);
            }
        }
        catalog
    }

    /// Add or replace profiles, validating each definition and the folder layout.
    pub fn merge(&mut self, defs: Vec<ProfileDefinition>) -> Result<(), ProfileError> {
        let mut next = self.profiles.clone();
        for def in defs {
            let profile = ComplianceProfile::from_definition(def)?;
            next.insert(profile.name.clone(), profile);
        }

        let mut folders: BTreeMap<String, String> = BTreeMap::new();
        for profile in next.values() {
            let folder_key = profile.folder.to_lowercase();
            if let Some(first) = folders.get(&folder_key) {
                return Err(ProfileError::DuplicateFolder {
                    first: first.clone(),
                    second: profile.name.clone(),
                    folder: profile.folder.clone(),
                });
            }
            folders.insert(folder_key, profile.name.clone());
        }

        self.profiles = next;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&ComplianceProfile, ProfileError> {
        self.profiles.get(name).ok_or_else(|| ProfileError::Unknown {
            name: name.to_string(),
            available: self.names().join(", "),
        })
    }

    /// Resolve a list of names, keeping the requested order and dropping repeats.
    pub fn select(&self, names: &[String]) -> Result<Vec<ComplianceProfile>, ProfileError> {
        let mut selected: Vec<ComplianceProfile> = Vec::new();
        for name in names {
            let profile = self.get(name.trim())?;
            if !selected.iter().any(|p| p.name == profile.name) {
                selected.push(profile.clone());
            }
        }
        Ok(selected)
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComplianceProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn physical(
    name: &str,
    display: &str,
    folder: &str,
    (width_mm, height_mm): (f64, f64),
    dpi: u32,
    max_kb: Option<u64>,
) -> ProfileDefinition {
    ProfileDefinition {
        name: name.to_string(),
        display_name: Some(display.to_string()),
        folder: Some(folder.to_string()),
        width_mm: Some(width_mm),
        height_mm: Some(height_mm),
        dpi: Some(dpi),
        max_kb,
        ..Default::default()
    }
}

fn biometric_pixels(
    name: &str,
    display: &str,
    folder: &str,
    dpi: u32,
    margins: MarginRatios,
) -> ProfileDefinition {
    ProfileDefinition {
        name: name.to_string(),
        display_name: Some(display.to_string()),
        folder: Some(folder.to_string()),
        width_px: Some(394),
        height_px: Some(512),
        dpi: Some(dpi),
        max_kb: Some(150),
        background: Some(BackgroundPolicy::Whiten),
        aspect_lock: Some(false),
        margins: Some(margins),
        quality: Some(90),
        ..Default::default()
    }
}

fn builtin_definitions() -> Vec<ProfileDefinition> {
    vec![
        ProfileDefinition {
            min_kb: Some(20),
            quality: Some(85),
            ..physical("e_okul", "35mm x 45mm (E-Okul)", "E-Okul", (35.0, 45.0), 400, Some(150))
        },
        biometric_pixels(
            "acik_lise",
            "394px x 512px (Acik Lise)",
            "Acik_Lise",
            400,
            MarginRatios {
                top: 0.8,
                bottom: 1.0,
                side: 0.6,
            },
        ),
        biometric_pixels(
            "mebbis",
            "394px x 512px (MEBBIS)",
            "MEBBIS",
            300,
            MarginRatios {
                top: 0.7,
                bottom: 0.9,
                side: 0.5,
            },
        ),
        physical("biometric", "50mm x 60mm (Biometric)", "Biometric", (50.0, 60.0), 300, None),
        physical("vesikalik", "45mm x 60mm (Vesikalik)", "Vesikalik", (45.0, 60.0), 300, None),
        physical("passport", "35mm x 35mm (Passport/Visa)", "Passport", (35.0, 35.0), 300, None),
        physical("license", "25mm x 35mm (Driving licence)", "License", (25.0, 35.0), 300, None),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mm_to_px_rounds_half_up() {
        assert_eq!(mm_to_px(35.0, 400), 551); // 551.18
        assert_eq!(mm_to_px(45.0, 400), 709); // 708.66
        assert_eq!(mm_to_px(25.4, 300), 300);
        // exact halves round up
        assert_eq!(mm_to_px(50.8, 45), 90);
        assert_eq!(mm_to_px(12.7, 1), 1);
    }

    #[test]
    fn test_e_okul_profile() {
        let catalog = ProfileCatalog::builtin();
        let e_okul = catalog.get("e_okul").unwrap();
        assert_eq!(e_okul.pixel_size(), (551, 709));
        assert_eq!(e_okul.max_encoded_bytes, Some(150 * 1024));
        assert_eq!(e_okul.min_encoded_bytes, Some(20 * 1024));
        assert_eq!(e_okul.quality, 85);
        assert_eq!(
            e_okul.size_budget(),
            SizeBudget {
                min: Some(20 * 1024),
                max: Some(150 * 1024)
            }
        );
        assert_eq!(e_okul.background, BackgroundPolicy::None);
        assert!(e_okul.aspect_lock);
        // Re-deriving gives the same answer
        assert_eq!(e_okul.pixel_size(), e_okul.clone().pixel_size());
    }

    #[test]
    fn test_size_limits_are_validated() {
        let base = ProfileDefinition {
            name: "card".to_string(),
            width_px: Some(300),
            height_px: Some(400),
            ..Default::default()
        };

        let huge = ProfileDefinition {
            max_kb: Some(u64::MAX / 2),
            ..base.clone()
        };
        assert!(matches!(
            ComplianceProfile::from_definition(huge),
            Err(ProfileError::Invalid { .. })
        ));

        let inverted = ProfileDefinition {
            min_kb: Some(200),
            max_kb: Some(100),
            ..base.clone()
        };
        assert!(ComplianceProfile::from_definition(inverted).is_err());

        let range = ProfileDefinition {
            min_kb: Some(20),
            max_kb: Some(100),
            ..base
        };
        let profile = ComplianceProfile::from_definition(range).unwrap();
        assert!(profile.describe().ends_with("20-100 KB"));
    }

    #[test]
    fn test_builtin_catalog_is_complete() {
        let catalog = ProfileCatalog::builtin();
        assert_eq!(catalog.len(), 7);
        for name in [
            "e_okul",
            "acik_lise",
            "mebbis",
            "biometric",
            "vesikalik",
            "passport",
            "license",
        ] {
            assert!(catalog.get(name).is_ok(), "missing builtin profile {}", name);
        }
        let mebbis = catalog.get("mebbis").unwrap();
        assert_eq!(mebbis.pixel_size(), (394, 512));
        assert_eq!(mebbis.background, BackgroundPolicy::Whiten);
        assert!(!mebbis.aspect_lock);
    }

    #[test]
    fn test_pixel_profile_derives_physical_size() {
        let catalog = ProfileCatalog::builtin();
        let acik = catalog.get("acik_lise").unwrap();
        let (wmm, hmm) = acik.physical_size_mm();
        assert!((wmm - 25.019).abs() < 0.01);
        assert!((hmm - 32.512).abs() < 0.01);
        // Converting back lands on the authoritative pixels
        assert_eq!(mm_to_px(wmm, acik.dpi), 394);
        assert_eq!(mm_to_px(hmm, acik.dpi), 512);
    }

    #[test]
    fn test_inconsistent_sizes_rejected() {
        let def = ProfileDefinition {
            name: "bad".into(),
            width_px: Some(600),
            height_px: Some(709),
            width_mm: Some(35.0),
            height_mm: Some(45.0),
            dpi: Some(400),
            ..Default::default()
        };
        assert!(matches!(
            ComplianceProfile::from_definition(def),
            Err(ProfileError::InconsistentSize { pixels: 600, .. })
        ));

        let within_tolerance = ProfileDefinition {
            name: "ok".into(),
            width_px: Some(552),
            height_px: Some(709),
            width_mm: Some(35.0),
            height_mm: Some(45.0),
            dpi: Some(400),
            ..Default::default()
        };
        let profile = ComplianceProfile::from_definition(within_tolerance).unwrap();
        assert_eq!(profile.pixel_size(), (552, 709));
    }

    #[test]
    fn test_invalid_definitions() {
        let missing_size = ProfileDefinition {
            name: "nosize".into(),
            ..Default::default()
        };
        assert!(ComplianceProfile::from_definition(missing_size).is_err());

        let unlocked_without_whiten = ProfileDefinition {
            name: "loose".into(),
            width_px: Some(300),
            height_px: Some(400),
            aspect_lock: Some(false),
            ..Default::default()
        };
        assert!(ComplianceProfile::from_definition(unlocked_without_whiten).is_err());

        let empty_name = ProfileDefinition {
            name: "  ".into(),
            width_px: Some(300),
            height_px: Some(400),
            ..Default::default()
        };
        assert_eq!(
            ComplianceProfile::from_definition(empty_name),
            Err(ProfileError::EmptyName)
        );

        let bad_dpi = ProfileDefinition {
            name: "dpi".into(),
            width_mm: Some(35.0),
            height_mm: Some(45.0),
            dpi: Some(10),
            ..Default::default()
        };
        assert!(ComplianceProfile::from_definition(bad_dpi).is_err());

        let reserved_folder = ProfileDefinition {
            name: "debug".into(),
            width_px: Some(300),
            height_px: Some(400),
            ..Default::default()
        };
        assert!(ComplianceProfile::from_definition(reserved_folder).is_err());
    }

    #[test]
    fn test_merge_from_json_and_folder_uniqueness() {
        let json = r#"[
            {"name": "school_card", "width_mm": 30, "height_mm": 40, "dpi": 300, "max_kb": 80},
            {"name": "e_okul", "width_mm": 35, "height_mm": 45, "dpi": 300, "folder": "E-Okul"}
        ]"#;
        let defs: Vec<ProfileDefinition> = serde_json::from_str(json).unwrap();
        let mut catalog = ProfileCatalog::builtin();
        catalog.merge(defs).unwrap();

        assert_eq!(catalog.len(), 8);
        assert_eq!(catalog.get("school_card").unwrap().pixel_size(), (354, 472));
        // Override replaced the builtin
        assert_eq!(catalog.get("e_okul").unwrap().dpi, 300);

        let clash = vec![ProfileDefinition {
            name: "other".into(),
            folder: Some("mebbis".into()),
            width_px: Some(300),
            height_px: Some(400),
            ..Default::default()
        }];
        let before = catalog.len();
        assert!(matches!(
            catalog.merge(clash),
            Err(ProfileError::DuplicateFolder { .. })
        ));
        assert_eq!(catalog.len(), before);
    }

    #[test]
    fn test_select_preserves_order_and_reports_unknown() {
        let catalog = ProfileCatalog::builtin();
        let names = vec!["mebbis".to_string(), "e_okul".to_string(), "mebbis".to_string()];
        let selected = catalog.select(&names).unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].name, "mebbis");
        assert_eq!(selected[1].name, "e_okul");

        let err = catalog.select(&["visa".to_string()]).unwrap_err();
        assert!(err.to_string().contains("visa"));
    }
}
