use clap::Parser;
use std::path::PathBuf;

use crate::identity::{NamingSelection, ResolverOptions, TextCase};
use crate::matching::MatchStrategy;

pub const DEFAULT_EXTENSIONS_STR: &str = "jpg,jpeg,png,bmp,tiff,webp";
pub const DEFAULT_PROFILE: &str = "e_okul";
pub const DEFAULT_SEPARATOR: &str = "_";
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

#[derive(Parser, Debug)]
#[command(
    name = "idphoto-processor",
    about = "Batch processor for compliance-sized, correctly named ID photos",
    long_about = "
ID Photo Processor

Turns a folder of portrait photos plus a roster of identity records into
compliance-sized ID photos. Every photo is paired with a record, cropped
around the detected face, scaled to each requested profile and encoded
under the profile's byte budget. Outputs are named after the record key.

Key Features:
• Built-in school and document profiles (e_okul, mebbis, passport, ...)
• Extra profiles from a JSON config file
• Face-centred crops with a centred fallback when no face is found
• JPEG quality search to meet per-profile file size limits
• National ID checksum validation and duplicate key detection
• Turkish-aware title case for file names
• Optional text watermark on every output
• Parallel batch processing with progress tracking

Example Usage:
  # Name photos after class and student number, produce e-Okul photos
  idphoto-processor -r students.json -p ~/Photos -o ~/out -n Class,Number,Name

  # Several profiles, outputs grouped by class, original photos copied
  idphoto-processor -r students.json -p ~/Photos -o ~/out -n Number,Name \\
    --profile e_okul,mebbis,vesikalik --class-column Class --by-class --copy-originals

  # Match photos by a column value contained in the file name
  idphoto-processor -r students.json -p ~/Photos -o ~/out -n Name \\
    --match by-column --match-column Number

  # Title-cased names, photos matched by name similarity, school watermark
  idphoto-processor -r students.json -p ~/Photos -o ~/out -n Number,Name \
    --text-case title --match by-name --watermark \"Example School 2024\"

  # Use an external face detector script
  idphoto-processor -r students.json -p ~/Photos -o ~/out -n Name \\
    --detector ./scripts/find_face.py --confidence 0.6

  # Show available profiles or roster columns
  idphoto-processor --list-profiles
  idphoto-processor -r students.json --list-columns

  # Dry run: plan every output without writing files
  idphoto-processor -r students.json -p ~/Photos -o ~/out -n Name --dry-run --verbose"
)]
pub struct Args {
    /// Identity records (JSON array of objects, or {columns, rows})
    #[arg(short = 'r', long = "records", value_name = "FILE")]
    pub records: Option<PathBuf>,

    /// Directory containing the source photos
    #[arg(short = 'p', long = "photos", value_name = "DIR")]
    pub photos: Option<PathBuf>,

    /// Output root; each run writes into a timestamped subdirectory
    #[arg(short = 'o', long = "output", default_value = ".", value_name = "DIR")]
    pub output: PathBuf,

    /// Compliance profiles to produce (comma separated)
    #[arg(
        long = "profile",
        value_delimiter = ',',
        default_value = DEFAULT_PROFILE,
        value_name = "NAME"
    )]
    pub profiles: Vec<String>,

    /// Roster columns joined into the file name key (comma separated, in order)
    #[arg(short = 'n', long = "name-column", value_delimiter = ',', value_name = "COLUMN")]
    pub name_columns: Vec<String>,

    /// Separator placed between naming column values
    #[arg(long = "separator", default_value = DEFAULT_SEPARATOR, value_name = "SEP")]
    pub separator: String,

    /// Letter case applied to the file name key
    #[arg(long = "text-case", value_enum, default_value = "as-is")]
    pub text_case: TextCase,

    /// Column holding the 11-digit national ID to validate
    #[arg(long = "national-id-column", value_name = "COLUMN")]
    pub national_id_column: Option<String>,

    /// Column holding the class/section label
    #[arg(long = "class-column", value_name = "COLUMN")]
    pub class_column: Option<String>,

    /// Treat national ID checksum failures as errors instead of warnings
    #[arg(long = "strict-national-id")]
    pub strict_national_id: bool,

    /// Leave invalid roster rows out instead of aborting
    #[arg(long = "skip-invalid")]
    pub skip_invalid: bool,

    /// How photos are paired with records
    #[arg(long = "match", value_enum, default_value = "by-key")]
    pub match_strategy: MatchStrategy,

    /// Column searched for in photo file names (with --match by-column)
    #[arg(long = "match-column", value_name = "COLUMN")]
    pub match_column: Option<String>,

    /// Group outputs into per-class subdirectories
    #[arg(long = "by-class")]
    pub by_class: bool,

    /// Copy each source photo, renamed after its record, into renamed/
    #[arg(long = "copy-originals")]
    pub copy_originals: bool,

    /// Number of parallel processing jobs (0 = auto-detect CPU cores)
    #[arg(short = 'j', long = "jobs", default_value = "0", value_name = "N")]
    pub jobs: usize,

    /// Minimum face detector confidence (0.0-1.0)
    #[arg(long = "confidence", default_value = "0.5", value_name = "THRESHOLD")]
    pub confidence: f32,

    /// External face detector program or python script
    #[arg(long = "detector", value_name = "FILE")]
    pub detector: Option<PathBuf>,

    /// Text stamped into the bottom-right corner of every output
    #[arg(long = "watermark", value_name = "TEXT")]
    pub watermark: Option<String>,

    /// TrueType font for the watermark (default: first system font found)
    #[arg(long = "watermark-font", value_name = "FILE")]
    pub watermark_font: Option<PathBuf>,

    /// Photo file extensions to consider (comma separated)
    #[arg(
        short = 'e',
        long = "extensions",
        default_value = DEFAULT_EXTENSIONS_STR,
        value_name = "EXT"
    )]
    pub extensions_str: String,

    /// JSON config file with `settings` and extra `profiles`
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the profile catalog and exit
    #[arg(long = "list-profiles")]
    pub list_profiles: bool,

    /// Print the roster's columns and exit
    #[arg(long = "list-columns")]
    pub list_columns: bool,

    /// Plan every output without writing any file
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Write face and crop overlays under debug/
    #[arg(long = "debug")]
    pub debug: bool,

    /// Emit JSON lines on stdout instead of human readable output
    #[arg(long = "json-progress")]
    pub json_progress: bool,

    /// Display a table of every output at the end
    #[arg(long = "report")]
    pub report: bool,

    /// Enable verbose output with detailed progress information
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Run directory name (default: current local time, %Y%m%d_%H%M%S)
    #[arg(long = "run-stamp", value_name = "STAMP")]
    pub run_stamp: Option<String>,
}

impl Args {
    /// Parse the extensions string into a vector
    pub fn parse_extensions(&self) -> Vec<String> {
        self.extensions_str
            .split(',')
            .map(|s| s.trim().trim_start_matches('.').to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Requested profile names, trimmed and de-duplicated in order.
    pub fn profile_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.profiles.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            naming: NamingSelection {
                columns: self
                    .name_columns
                    .iter()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect(),
                separator: self.separator.clone(),
                text_case: self.text_case,
            },
            national_id_column: self.national_id_column.clone(),
            class_column: self.class_column.clone(),
            match_column: self.match_column.clone(),
            strict_national_id: self.strict_national_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extensions() {
        let args = Args {
            extensions_str: "jpg,png,webp".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_extensions(), vec!["jpg", "png", "webp"]);

        let args = Args {
            extensions_str: "JPG, .PNG , WEBP ".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_extensions(), vec!["jpg", "png", "webp"]);
    }

    #[test]
    fn test_parse_command_line() {
        let args = Args::try_parse_from([
            "idphoto-processor",
            "-r",
            "students.json",
            "-p",
            "photos",
            "-n",
            "Class,Number",
            "--profile",
            "e_okul,mebbis,e_okul",
            "--match",
            "by-column",
            "--match-column",
            "Number",
            "-j",
            "4",
        ])
        .unwrap();

        assert_eq!(args.records, Some(PathBuf::from("students.json")));
        assert_eq!(args.name_columns, vec!["Class", "Number"]);
        assert_eq!(args.profile_names(), vec!["e_okul", "mebbis"]);
        assert_eq!(args.match_strategy, MatchStrategy::ByColumn);
        assert_eq!(args.jobs, 4);
        assert_eq!(args.separator, "_");

        let options = args.resolver_options();
        assert_eq!(options.naming.columns, vec!["Class", "Number"]);
        assert_eq!(options.match_column.as_deref(), Some("Number"));
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["idphoto-processor", "--list-profiles"]).unwrap();
        assert_eq!(args.profile_names(), vec![DEFAULT_PROFILE]);
        assert_eq!(args.match_strategy, MatchStrategy::ByKey);
        assert_eq!(args.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(args.extensions_str, DEFAULT_EXTENSIONS_STR);
        assert_eq!(args.text_case, TextCase::AsIs);
        assert!(args.watermark.is_none());
    }

    #[test]
    fn test_text_case_and_watermark_flags() {
        let args = Args::try_parse_from([
            "idphoto-processor",
            "-n",
            "Name",
            "--text-case",
            "title",
            "--match",
            "by-name",
            "--watermark",
            "School 2024",
            "--watermark-font",
            "/fonts/a.ttf",
        ])
        .unwrap();

        assert_eq!(args.text_case, TextCase::Title);
        assert_eq!(args.match_strategy, MatchStrategy::ByName);
        assert_eq!(args.watermark.as_deref(), Some("School 2024"));
        assert_eq!(args.watermark_font, Some(PathBuf::from("/fonts/a.ttf")));
        assert_eq!(args.resolver_options().naming.text_case, TextCase::Title);

        assert!(Args::try_parse_from(["idphoto-processor", "--text-case", "shouty"]).is_err());
    }
}

// Default implementation for tests
#[cfg(test)]
impl Default for Args {
    fn default() -> Self {
        Self {
            records: None,
            photos: None,
            output: PathBuf::from("."),
            profiles: vec![DEFAULT_PROFILE.to_string()],
            name_columns: vec![],
            separator: DEFAULT_SEPARATOR.to_string(),
            text_case: TextCase::AsIs,
            national_id_column: None,
            class_column: None,
            strict_national_id: false,
            skip_invalid: false,
            match_strategy: MatchStrategy::ByKey,
            match_column: None,
            by_class: false,
            copy_originals: false,
            jobs: 0,
            confidence: DEFAULT_CONFIDENCE,
            detector: None,
            watermark: None,
            watermark_font: None,
            extensions_str: DEFAULT_EXTENSIONS_STR.to_string(),
            config: None,
            list_profiles: false,
            list_columns: false,
            dry_run: false,
            debug: false,
            json_progress: false,
            report: false,
            verbose: false,
            run_stamp: None,
        }
    }
}
