use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::cli::Args;

/// Characters that are not allowed in file names on common file systems.
const INVALID_NAME_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Create a styled progress bar
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner:.blue} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg} ({eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Format duration in a human-readable way
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 60 {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        format!("{}m {}s", mins, secs)
    } else if total_secs > 0 {
        format!("{}.{:03}s", total_secs, millis)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Format a byte count as B / KB / MB
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Validate command line arguments
pub fn validate_inputs(args: &Args) -> Result<()> {
    if !args.list_profiles {
        let records = args
            .records
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("--records is required"))?;
        if !records.is_file() {
            return Err(anyhow::anyhow!(
                "Records file does not exist: {}",
                records.display()
            ));
        }
    }

    if !args.list_profiles && !args.list_columns {
        let photos = args
            .photos
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("--photos is required"))?;
        if !photos.is_dir() {
            return Err(anyhow::anyhow!(
                "Photo directory does not exist: {}",
                photos.display()
            ));
        }

        if args.name_columns.is_empty() {
            return Err(anyhow::anyhow!(
                "At least one naming column is required (--name-column)"
            ));
        }
    }

    let extensions = args.parse_extensions();
    if extensions.is_empty() {
        return Err(anyhow::anyhow!("No valid extensions specified"));
    }

    if args.jobs > 32 {
        return Err(anyhow::anyhow!(
            "Job count too high (max 32), got: {}",
            args.jobs
        ));
    }

    if !(0.0..=1.0).contains(&args.confidence) {
        return Err(anyhow::anyhow!(
            "Confidence floor must be between 0.0 and 1.0, got: {}",
            args.confidence
        ));
    }

    Ok(())
}

/// Get file extension in lowercase
pub fn get_file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Check if a file has one of the specified extensions
pub fn has_valid_extension(path: &Path, extensions: &[String]) -> bool {
    if let Some(ext) = get_file_extension(path) {
        extensions.contains(&ext)
    } else {
        false
    }
}

/// Turn a joined identity value into a string that is safe as a file name.
///
/// Invalid characters and control characters become `_`. Spaces become `_`
/// too unless the naming separator is itself a space. Runs of `_` or of the
/// separator collapse to one, and both are trimmed from the ends. The result
/// may be empty.
pub fn sanitize_key(raw: &str, separator: &str) -> String {
    let keep_spaces = separator == " ";
    let mut replaced = String::with_capacity(raw.len());

    for ch in raw.trim().chars() {
        let c = match ch {
            c if INVALID_NAME_CHARS.contains(&c) => '_',
            ' ' if keep_spaces => ' ',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        };
        replaced.push(c);
    }

    let mut result = collapse_repeats(replaced, "_");
    if !separator.is_empty() && separator != "_" {
        result = collapse_repeats(result, separator);
    }

    loop {
        let mut trimmed = result.trim().trim_matches('_');
        if !separator.is_empty() {
            trimmed = trimmed.strip_prefix(separator).unwrap_or(trimmed);
            trimmed = trimmed.strip_suffix(separator).unwrap_or(trimmed);
        }
        if trimmed.len() == result.len() {
            return result;
        }
        result = trimmed.to_string();
    }
}

fn collapse_repeats(mut text: String, token: &str) -> String {
    let doubled = token.repeat(2);
    while text.contains(&doubled) {
        text = text.replace(&doubled, token);
    }
    text
}

/// Initialise `tracing` output on stderr. `RUST_LOG` overrides the default level.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Print verbose information if verbose mode is enabled
pub fn verbose_println(verbose: bool, message: &str) {
    if verbose {
        println!("{} {}", style("[VERBOSE]").dim(), message);
    }
}

/// Print warning message
pub fn warn_println(message: &str) {
    println!("{} {}", style("[WARNING]").yellow().bold(), message);
}

/// Print error message
pub fn error_println(message: &str) {
    eprintln!("{} {}", style("[ERROR]").red().bold(), message);
}
