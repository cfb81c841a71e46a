use crate::cli::{Args, DEFAULT_CONFIDENCE, DEFAULT_EXTENSIONS_STR, DEFAULT_SEPARATOR};
use crate::identity::TextCase;
use crate::matching::MatchStrategy;
use crate::profile::ProfileDefinition;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Config file layout: run settings plus extra compliance profiles.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    #[serde(default)]
    pub settings: SettingsJson,
    #[serde(default)]
    pub profiles: Vec<ProfileDefinition>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsJson {
    pub records: Option<String>,
    pub photos: Option<String>,
    pub output: Option<String>,
    pub profiles: Option<Vec<String>>,
    pub name_columns: Option<Vec<String>>,
    pub separator: Option<String>,
    pub text_case: Option<String>,
    pub national_id_column: Option<String>,
    pub class_column: Option<String>,
    pub strict_national_id: Option<bool>,
    pub skip_invalid: Option<bool>,
    pub match_strategy: Option<String>,
    pub match_column: Option<String>,
    pub by_class: Option<bool>,
    pub copy_originals: Option<bool>,
    pub jobs: Option<usize>,
    pub confidence: Option<f32>,
    pub detector: Option<String>,
    pub watermark: Option<String>,
    pub watermark_font: Option<String>,
    pub extensions: Option<String>,
    pub dry_run: Option<bool>,
    pub debug: Option<bool>,
    pub report: Option<bool>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

impl Args {
    /// Load the config file, if any, and merge its settings.
    /// Command-line arguments take precedence over config file values.
    /// Returns the profile definitions the file declares.
    pub fn load_and_merge_config(&mut self) -> Result<Vec<ProfileDefinition>> {
        let Some(config_path) = self.config.clone() else {
            return Ok(Vec::new());
        };

        let config = ConfigFile::load(&config_path)?;
        let cli_flags: Vec<String> = std::env::args().collect();
        self.merge_settings(config.settings, &cli_flags)?;

        tracing::debug!(
            "loaded configuration from {} ({} profile definition(s))",
            config_path.display(),
            config.profiles.len()
        );
        Ok(config.profiles)
    }

    /// Apply `settings` wherever the option was not given on the command line.
    pub fn merge_settings(&mut self, settings: SettingsJson, cli_flags: &[String]) -> Result<()> {
        let given = |names: &[&str]| {
            cli_flags.iter().any(|arg| {
                names
                    .iter()
                    .any(|name| arg == name || arg.starts_with(&format!("{}=", name)))
            })
        };

        if self.records.is_none() {
            self.records = settings.records.map(PathBuf::from);
        }
        if self.photos.is_none() {
            self.photos = settings.photos.map(PathBuf::from);
        }
        if !given(&["-o", "--output"]) {
            if let Some(output) = settings.output {
                self.output = PathBuf::from(output);
            }
        }
        if !given(&["--profile"]) {
            if let Some(profiles) = settings.profiles {
                self.profiles = profiles;
            }
        }
        if self.name_columns.is_empty() {
            self.name_columns = settings.name_columns.unwrap_or_default();
        }
        if self.separator == DEFAULT_SEPARATOR {
            if let Some(separator) = settings.separator {
                self.separator = separator;
            }
        }
        if !given(&["--text-case"]) {
            if let Some(case) = settings.text_case {
                self.text_case = TextCase::from_str(&case)
                    .with_context(|| format!("Unknown text case in config: {}", case))?;
            }
        }
        if self.national_id_column.is_none() {
            self.national_id_column = settings.national_id_column;
        }
        if self.class_column.is_none() {
            self.class_column = settings.class_column;
        }
        if self.match_column.is_none() {
            self.match_column = settings.match_column;
        }
        if !given(&["--match"]) {
            if let Some(strategy) = settings.match_strategy {
                self.match_strategy = MatchStrategy::from_str(&strategy)
                    .with_context(|| format!("Unknown match strategy in config: {}", strategy))?;
            }
        }
        if self.jobs == 0 {
            if let Some(jobs) = settings.jobs {
                self.jobs = jobs;
            }
        }
        if self.confidence == DEFAULT_CONFIDENCE {
            if let Some(confidence) = settings.confidence {
                self.confidence = confidence;
            }
        }
        if self.detector.is_none() {
            self.detector = settings.detector.map(PathBuf::from);
        }
        if self.watermark.is_none() {
            self.watermark = settings.watermark;
        }
        if self.watermark_font.is_none() {
            self.watermark_font = settings.watermark_font.map(PathBuf::from);
        }
        if self.extensions_str == DEFAULT_EXTENSIONS_STR {
            if let Some(ext) = settings.extensions {
                self.extensions_str = ext;
            }
        }

        // Boolean flags - only apply if currently false (default)
        self.strict_national_id |= settings.strict_national_id.unwrap_or(false);
        self.skip_invalid |= settings.skip_invalid.unwrap_or(false);
        self.by_class |= settings.by_class.unwrap_or(false);
        self.copy_originals |= settings.copy_originals.unwrap_or(false);
        self.dry_run |= settings.dry_run.unwrap_or(false);
        self.debug |= settings.debug.unwrap_or(false);
        self.report |= settings.report.unwrap_or(false);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "settings": {
            "photos": "/data/photos",
            "output": "/data/out",
            "profiles": ["e_okul", "school_card"],
            "nameColumns": ["Class", "Number"],
            "matchStrategy": "by-column",
            "matchColumn": "Number",
            "jobs": 6,
            "byClass": true,
            "textCase": "title",
            "watermark": "Example School"
        },
        "profiles": [
            { "name": "school_card", "width_mm": 30.0, "height_mm": 40.0, "dpi": 300 }
        ]
    }"#;

    #[test]
    fn test_config_fills_unset_options() {
        let config: ConfigFile = serde_json::from_str(CONFIG).unwrap();
        assert_eq!(config.profiles.len(), 1);

        let mut args = Args::default();
        args.merge_settings(config.settings, &[]).unwrap();

        assert_eq!(args.photos, Some(PathBuf::from("/data/photos")));
        assert_eq!(args.output, PathBuf::from("/data/out"));
        assert_eq!(args.profile_names(), vec!["e_okul", "school_card"]);
        assert_eq!(args.name_columns, vec!["Class", "Number"]);
        assert_eq!(args.match_strategy, MatchStrategy::ByColumn);
        assert_eq!(args.jobs, 6);
        assert!(args.by_class);
        assert!(!args.dry_run);
        assert_eq!(args.text_case, TextCase::Title);
        assert_eq!(args.watermark.as_deref(), Some("Example School"));
        assert!(args.watermark_font.is_none());
    }

    #[test]
    fn test_command_line_wins() {
        let config: ConfigFile = serde_json::from_str(CONFIG).unwrap();
        let mut args = Args {
            output: PathBuf::from("cli_out"),
            profiles: vec!["passport".to_string()],
            name_columns: vec!["Name".to_string()],
            jobs: 2,
            ..Default::default()
        };
        let flags: Vec<String> = [
            "idphoto-processor",
            "-o",
            "cli_out",
            "--profile=passport",
            "--text-case",
            "as-is",
        ]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.merge_settings(config.settings, &flags).unwrap();

        assert_eq!(args.output, PathBuf::from("cli_out"));
        assert_eq!(args.profile_names(), vec!["passport"]);
        assert_eq!(args.name_columns, vec!["Name"]);
        assert_eq!(args.jobs, 2);
        assert_eq!(args.text_case, TextCase::AsIs);
    }

    #[test]
    fn test_bad_match_strategy_is_rejected() {
        let settings = SettingsJson {
            match_strategy: Some("by-magic".to_string()),
            ..Default::default()
        };
        let mut args = Args::default();
        assert!(args.merge_settings(settings, &[]).is_err());

        let settings = SettingsJson {
            text_case: Some("shouty".to_string()),
            ..Default::default()
        };
        assert!(Args::default().merge_settings(settings, &[]).is_err());
    }

    #[test]
    fn test_empty_config() {
        let config: ConfigFile = serde_json::from_str("{}").unwrap();
        assert!(config.profiles.is_empty());
        assert!(config.settings.records.is_none());
    }
}
