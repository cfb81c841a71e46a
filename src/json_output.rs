//! JSON output for GUI integration
//!
//! When --json-progress flag is enabled, all progress and status information
//! is emitted as JSON lines to stdout, suppressing all other output.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::image_processing::batch::{BatchSummary, JobOutcome};

/// Last progress emission timestamp (milliseconds since epoch)
/// Used for throttling progress updates to ~25 FPS (40ms between updates)
static LAST_PROGRESS_MS: AtomicU64 = AtomicU64::new(0);

const PROGRESS_INTERVAL_MS: u64 = 40;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub profile: String,
    pub status: String,
    pub path: Option<String>,
    pub bytes: Option<u64>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonMessage {
    /// Progress update
    Progress {
        current: usize,
        total: usize,
        message: String,
        /// Estimated seconds until the batch finishes
        eta_secs: Option<f64>,
    },
    /// Every profile of a job produced an output
    JobCompleted {
        key: String,
        photo: String,
        outputs: Vec<OutputEntry>,
    },
    /// At least one profile of a job failed
    JobFailed {
        key: String,
        photo: String,
        outputs: Vec<OutputEntry>,
        error: String,
    },
    /// Processing summary
    Summary {
        jobs: usize,
        outputs: usize,
        succeeded: usize,
        fallback: usize,
        failed: usize,
        cancelled: usize,
        duration_secs: f64,
    },
}

impl JsonMessage {
    /// Emit JSON message to stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    /// Create and emit progress message (throttled to ~25 FPS for smooth GUI updates)
    ///
    /// The final progress (current == total) is always emitted.
    pub fn progress(current: usize, total: usize, message: impl Into<String>, eta: Option<Duration>) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        if should_emit(now_ms, current, total) {
            Self::Progress {
                current,
                total,
                message: message.into(),
                eta_secs: eta.map(|d| d.as_secs_f64()),
            }
            .emit();
        }
    }

    /// `jobcompleted` or `jobfailed` for a finished job; cancelled jobs produce nothing.
    pub fn for_outcome(outcome: &JobOutcome) -> Option<Self> {
        if outcome.is_cancelled() {
            return None;
        }
        let outputs: Vec<OutputEntry> = outcome
            .results
            .iter()
            .map(|r| OutputEntry {
                profile: r.profile.clone(),
                status: r.status.to_string(),
                path: r.output_path.as_ref().map(|p| p.display().to_string()),
                bytes: r.encoded_bytes,
                detail: r.detail.clone(),
            })
            .collect();
        let key = outcome.record_key.clone();
        let photo = outcome.photo.display().to_string();

        if outcome.all_succeeded() {
            Some(Self::JobCompleted { key, photo, outputs })
        } else {
            let error = outcome
                .results
                .iter()
                .filter(|r| !r.status.is_success())
                .map(|r| format!("{}: {}", r.profile, r.detail.as_deref().unwrap_or("failed")))
                .collect::<Vec<_>>()
                .join("; ");
            Some(Self::JobFailed {
                key,
                photo,
                outputs,
                error,
            })
        }
    }

    pub fn summary(summary: &BatchSummary, duration_secs: f64) -> Self {
        use crate::image_processing::JobStatus;
        Self::Summary {
            jobs: summary.jobs,
            outputs: summary.results,
            succeeded: summary.count(JobStatus::Success),
            fallback: summary.count(JobStatus::FaceNotFoundFallback),
            failed: summary.failed(),
            cancelled: summary.count(JobStatus::Cancelled),
            duration_secs,
        }
    }
}

/// Emit when the interval has passed since the last emission, or on the final update.
fn should_emit(now_ms: u64, current: usize, total: usize) -> bool {
    let last_ms = LAST_PROGRESS_MS.load(Ordering::Relaxed);
    if now_ms.saturating_sub(last_ms) >= PROGRESS_INTERVAL_MS || current == total {
        LAST_PROGRESS_MS.store(now_ms, Ordering::Relaxed);
        true
    } else {
        false
    }
}
