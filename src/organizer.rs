//! Output path layout.
//!
//! ```text
//! <root>/<run_stamp>/
//!     renamed/[class/]<key>.<source ext>
//!     <profile folder>/[class/]<key>.<jpg|png>
//!     debug/<profile folder>/<key>.png
//! ```
//!
//! Keys are unique per batch and profile folders are unique per catalog, so
//! the path of a (record, profile) pair never collides with another pair.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::identity::IdentityRecord;
use crate::profile::ComplianceProfile;
use crate::utils::sanitize_key;

pub const RENAMED_DIR: &str = "renamed";
pub const DEBUG_DIR: &str = "debug";
pub const UNASSIGNED_CLASS: &str = "unassigned";
pub const RUN_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub run_stamp: String,
    pub by_class: bool,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, run_stamp: impl Into<String>, by_class: bool) -> Self {
        Self {
            root: root.into(),
            run_stamp: run_stamp.into(),
            by_class,
        }
    }

    /// Layout stamped with the current local time.
    pub fn stamped_now(root: impl Into<PathBuf>, by_class: bool) -> Self {
        let stamp = chrono::Local::now().format(RUN_STAMP_FORMAT).to_string();
        Self::new(root, stamp, by_class)
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join(&self.run_stamp)
    }

    pub fn renamed_original_path(&self, record: &IdentityRecord, source_ext: &str) -> PathBuf {
        let ext = source_ext.trim_start_matches('.').to_lowercase();
        self.tier(RENAMED_DIR, record)
            .join(format!("{}.{}", record.key, ext))
    }

    pub fn profile_output_path(&self, record: &IdentityRecord, profile: &ComplianceProfile) -> PathBuf {
        self.tier(&profile.folder, record)
            .join(format!("{}.{}", record.key, profile.format.extension()))
    }

    pub fn debug_overlay_path(&self, record: &IdentityRecord, profile: &ComplianceProfile) -> PathBuf {
        self.run_dir()
            .join(DEBUG_DIR)
            .join(&profile.folder)
            .join(format!("{}.png", record.key))
    }

    fn tier(&self, folder: &str, record: &IdentityRecord) -> PathBuf {
        let dir = self.run_dir().join(folder);
        if self.by_class {
            dir.join(class_folder(record))
        } else {
            dir
        }
    }
}

/// Directory name for a record's class label.
pub fn class_folder(record: &IdentityRecord) -> String {
    record
        .class_label
        .as_deref()
        .map(|label| sanitize_key(label, "_"))
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| UNASSIGNED_CLASS.to_string())
}

/// Create the parent directory of `path`. Concurrent callers creating the
/// same directory all succeed.
pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => match fs::create_dir_all(parent) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && parent.is_dir() => Ok(()),
            other => other,
        },
        _ => Ok(()),
    }
}
