//! Typed errors for the pipeline library.
//!
//! Per-job failures are captured into a `ProcessingResult` by the batch
//! orchestrator; only profile configuration errors are fatal.

use std::path::PathBuf;
use thiserror::Error;

use crate::image_processing::JobStatus;

/// A failure confined to one (record, profile) job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a decodable image: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("encoded size {achieved} bytes exceeds the {budget} byte budget even at minimum quality")]
    BudgetUnmet { achieved: u64, budget: u64 },

    #[error("encoder failed: {0}")]
    Encode(String),

    #[error("image processing failed: {0}")]
    Render(String),
}

impl JobError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        JobError::Io {
            path: path.into(),
            source,
        }
    }

    /// Status reported in the job's `ProcessingResult`.
    pub fn status(&self) -> JobStatus {
        match self {
            JobError::Io { .. } | JobError::Encode(_) => JobStatus::IoFailure,
            JobError::UnsupportedFormat { .. } => JobStatus::UnsupportedFormat,
            JobError::BudgetUnmet { .. } => JobStatus::BudgetUnmet,
            JobError::Render(_) => JobStatus::InternalFailure,
        }
    }

    /// Encoded size reached before giving up, for diagnostics.
    pub fn achieved_bytes(&self) -> Option<u64> {
        match self {
            JobError::BudgetUnmet { achieved, .. } => Some(*achieved),
            _ => None,
        }
    }
}

/// Malformed or unknown compliance profile.
#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("profile name must not be empty")]
    EmptyName,

    #[error("profile '{name}': {reason}")]
    Invalid { name: String, reason: String },

    #[error("profile '{name}' declares {pixels}px but its physical size derives {derived}px (tolerance 1px)")]
    InconsistentSize {
        name: String,
        pixels: u32,
        derived: u32,
    },

    #[error("profiles '{first}' and '{second}' share output folder '{folder}'")]
    DuplicateFolder {
        first: String,
        second: String,
        folder: String,
    },

    #[error("unknown profile '{name}' (available: {available})")]
    Unknown { name: String, available: String },
}

/// Failure of the external face detection capability.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to prepare detector input: {0}")]
    Input(String),

    #[error("failed to run face detector '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("face detector exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("face detector returned malformed output: {0}")]
    Malformed(String),

    #[error("face detector reported: {0}")]
    Reported(String),
}
