//! Result tables printed after a batch with `--report`.

use prettytable::{format, Cell, Row, Table};
use std::path::Path;

use crate::image_processing::batch::{BatchSummary, JobOutcome};
use crate::image_processing::JobStatus;
use crate::profile::{BackgroundPolicy, ProfileCatalog};
use crate::utils::format_bytes;

/// One printed line: a single (record, profile) result.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub key: String,
    pub profile: String,
    pub status: JobStatus,
    pub size: Option<u64>,
    pub quality: Option<u8>,
    pub output: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub entries: Vec<ReportEntry>,
    pub summary: BatchSummary,
    /// Base for shortening output paths in the table.
    pub output_root: Option<std::path::PathBuf>,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: &[JobOutcome], output_root: Option<&Path>) -> Self {
        let entries = outcomes
            .iter()
            .flat_map(|outcome| outcome.results.iter())
            .map(|result| ReportEntry {
                key: result.record_key.clone(),
                profile: result.profile.clone(),
                status: result.status,
                size: result.encoded_bytes,
                quality: result.quality,
                output: result
                    .output_path
                    .as_deref()
                    .map(|p| display_relative(p, output_root)),
                detail: result.detail.clone(),
            })
            .collect();

        Self {
            entries,
            summary: BatchSummary::from_outcomes(outcomes),
            output_root: output_root.map(Path::to_path_buf),
        }
    }

    /// Entries that need a human look: failures and fallback crops.
    pub fn attention(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(|e| e.status != JobStatus::Success && e.status != JobStatus::Cancelled)
    }

    pub fn results_table(&self) -> Table {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_BOX_CHARS);
        table.add_row(Row::new(vec![
            Cell::new("Key"),
            Cell::new("Profile"),
            Cell::new("Status"),
            Cell::new("Size"),
            Cell::new("Quality"),
            Cell::new("Output"),
        ]));

        for entry in &self.entries {
            table.add_row(Row::new(vec![
                Cell::new(&entry.key),
                Cell::new(&entry.profile),
                Cell::new(&entry.status.to_string()),
                Cell::new(&entry.size.map(format_bytes).unwrap_or_else(|| "-".to_string())),
                Cell::new(&entry.quality.map(|q| q.to_string()).unwrap_or_else(|| "-".to_string())),
                Cell::new(entry.output.as_deref().unwrap_or("-")),
            ]));
        }
        table
    }

    pub fn status_table(&self) -> Table {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_BOX_CHARS);
        table.add_row(Row::new(vec![Cell::new("Status"), Cell::new("Count")]));
        for status in JobStatus::ALL {
            let count = self.summary.count(status);
            if count > 0 {
                table.add_row(Row::new(vec![
                    Cell::new(&status.to_string()),
                    Cell::new(&count.to_string()),
                ]));
            }
        }
        table
    }

    pub fn print(&self) {
        println!("\nRESULTS ({} outputs for {} photos)\n", self.summary.results, self.summary.jobs);
        self.results_table().printstd();

        println!();
        self.status_table().printstd();

        let attention: Vec<&ReportEntry> = self.attention().collect();
        if !attention.is_empty() {
            println!("\nNeeds review:");
            for entry in attention {
                println!(
                    "  {} [{}] {}: {}",
                    entry.key,
                    entry.profile,
                    entry.status,
                    entry.detail.as_deref().unwrap_or("")
                );
            }
        }
        println!();
    }
}

/// One row per catalog profile, for `--list-profiles`.
pub fn profile_table(catalog: &ProfileCatalog) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.add_row(Row::new(vec![
        Cell::new("Name"),
        Cell::new("Description"),
        Cell::new("Folder"),
        Cell::new("Size"),
        Cell::new("Background"),
        Cell::new("Format"),
    ]));
    for profile in catalog.iter() {
        let background = match profile.background {
            BackgroundPolicy::None => "none",
            BackgroundPolicy::Whiten => "white fill",
        };
        table.add_row(Row::new(vec![
            Cell::new(&profile.name),
            Cell::new(&profile.display_name),
            Cell::new(&profile.folder),
            Cell::new(&profile.describe()),
            Cell::new(background),
            Cell::new(profile.format.extension()),
        ]));
    }
    table
}

fn display_relative(path: &Path, root: Option<&Path>) -> String {
    root.and_then(|root| path.strip_prefix(root).ok())
        .unwrap_or(path)
        .display()
        .to_string()
}
