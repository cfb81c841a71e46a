use rayon::prelude::*;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{JobStatus, ProcessingResult};
use crate::identity::IdentityRecord;
use crate::profile::ComplianceProfile;

/// Hard ceiling on the worker pool.
pub const MAX_WORKERS: usize = 32;
/// Ceiling applied when the worker count is derived from the CPU count.
pub const AUTO_WORKER_CAP: usize = 16;

/// Progress, ETA and throughput for console output.
pub struct BatchProcessor {
    pub total_jobs: usize,
    pub processed_count: AtomicUsize,
    pub start_time: Instant,
}

impl BatchProcessor {
    pub fn new(total_jobs: usize) -> Self {
        Self {
            total_jobs,
            processed_count: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    /// Increment processed count and return current count
    pub fn increment(&self) -> usize {
        self.processed_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get estimated time remaining
    pub fn eta(&self) -> Option<Duration> {
        let processed = self.processed_count.load(Ordering::Relaxed);
        if processed == 0 {
            return None;
        }

        let remaining = self.total_jobs.saturating_sub(processed);
        if remaining == 0 {
            return Some(Duration::ZERO);
        }

        let time_per_item = self.start_time.elapsed() / processed as u32;
        Some(time_per_item * remaining as u32)
    }

    /// Get processing speed (items per second)
    pub fn items_per_second(&self) -> f64 {
        let processed = self.processed_count.load(Ordering::Relaxed);
        let elapsed_secs = self.start_time.elapsed().as_secs_f64();
        if processed == 0 || elapsed_secs == 0.0 {
            return 0.0;
        }
        processed as f64 / elapsed_secs
    }
}

/// One photo for one record, rendered into every requested profile.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub index: usize,
    pub record: IdentityRecord,
    pub photo: PathBuf,
    pub profiles: Arc<[ComplianceProfile]>,
}

/// Everything a job produced. `results` holds one entry per requested profile.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub index: usize,
    pub record_key: String,
    pub photo: PathBuf,
    pub results: Vec<ProcessingResult>,
    pub original_copy: Option<PathBuf>,
    /// Non-fatal problems, such as a failed detector or original copy.
    pub notes: Vec<String>,
}

impl JobOutcome {
    /// Empty outcome for `job`, to be filled by a runner.
    pub fn new(job: &BatchJob) -> Self {
        Self {
            index: job.index,
            record_key: job.record.key.clone(),
            photo: job.photo.clone(),
            results: Vec::with_capacity(job.profiles.len()),
            original_copy: None,
            notes: Vec::new(),
        }
    }

    pub fn cancelled(job: &BatchJob) -> Self {
        let mut outcome = Self::new(job);
        outcome.results = job
            .profiles
            .iter()
            .map(|p| ProcessingResult::cancelled(&job.record.key, &p.name))
            .collect();
        outcome
    }

    pub fn internal_failure(job: &BatchJob, detail: &str) -> Self {
        let mut outcome = Self::new(job);
        outcome.results = job
            .profiles
            .iter()
            .map(|p| {
                ProcessingResult::failed(&job.record.key, &p.name, JobStatus::InternalFailure, detail)
            })
            .collect();
        outcome
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.status.is_success())
    }

    pub fn is_cancelled(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.status == JobStatus::Cancelled)
    }
}

/// Executes a single job. Implementations must not panic across jobs; any
/// panic is caught and reported as `InternalFailure`.
pub trait JobRunner: Send + Sync {
    fn run_job(&self, job: &BatchJob) -> JobOutcome;
}

/// Shared cancellation flag, checked before each job starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Jobs finished so far, including this one. Strictly increasing.
    pub completed: usize,
    pub total: usize,
    pub outcome: JobOutcome,
}

pub type ProgressCallback = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

#[derive(Default)]
struct HubState {
    completed: usize,
    subscribers: Vec<ProgressCallback>,
}

/// Fans progress events out to subscribers.
///
/// Callbacks run on worker threads while the hub lock is held, so they see
/// events one at a time in completion order. A callback must not subscribe
/// to the same hub.
#[derive(Clone, Default)]
pub struct ProgressHub {
    state: Arc<Mutex<HubState>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: ProgressCallback) {
        self.lock().subscribers.push(callback);
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        // A panicking subscriber must not silence the rest of the batch
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, total: usize, outcome: &JobOutcome) {
        let mut state = self.lock();
        state.completed += 1;
        if state.subscribers.is_empty() {
            return;
        }
        let event = ProgressEvent {
            completed: state.completed,
            total,
            outcome: outcome.clone(),
        };
        for callback in &state.subscribers {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                warn!("progress subscriber panicked on job {}", event.outcome.index);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Worker threads; 0 picks a count from the available CPUs.
    pub workers: usize,
    pub cancellation: Option<CancellationToken>,
}

/// Worker count actually used for `job_count` jobs.
pub fn effective_workers(requested: usize, job_count: usize) -> usize {
    let base = if requested == 0 {
        num_cpus::get().min(AUTO_WORKER_CAP)
    } else {
        requested.min(MAX_WORKERS)
    };
    base.min(job_count).max(1)
}

/// Run every job and return one outcome per job, in job order.
///
/// Jobs not started before `cancel` is set are reported as `Cancelled`
/// and emit no progress.
pub fn run_batch(
    runner: &dyn JobRunner,
    jobs: &[BatchJob],
    workers: usize,
    cancel: &CancellationToken,
    progress: &ProgressHub,
) -> Vec<JobOutcome> {
    let total = jobs.len();
    let workers = effective_workers(workers, total);
    debug!("running {} job(s) on {} worker(s)", total, workers);

    let process = |job: &BatchJob| -> JobOutcome {
        if cancel.is_cancelled() {
            return JobOutcome::cancelled(job);
        }
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| runner.run_job(job))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                warn!("job {} ({}) panicked: {}", job.index, job.record.key, detail);
                JobOutcome::internal_failure(job, &format!("worker panicked: {}", detail))
            }
        };
        progress.emit(total, &outcome);
        outcome
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("idphoto-worker-{}", i))
        .build();

    match pool {
        Ok(pool) => pool.install(|| jobs.par_iter().map(process).collect()),
        Err(e) => {
            warn!("could not build worker pool ({}), running sequentially", e);
            jobs.iter().map(process).collect()
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A batch running in the background.
pub struct BatchHandle {
    total: usize,
    cancel: CancellationToken,
    progress: ProgressHub,
    thread: JoinHandle<Vec<JobOutcome>>,
    /// Reported for every job if the batch thread dies.
    placeholders: Vec<JobOutcome>,
}

impl BatchHandle {
    pub fn total_jobs(&self) -> usize {
        self.total
    }

    /// Idempotent, callable from any thread.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Events for jobs finished before subscribing are not replayed; use
    /// [`submit_batch_with_progress`] to observe every job.
    pub fn subscribe_progress(&self, callback: ProgressCallback) {
        self.progress.subscribe(callback);
    }

    /// Block until the batch ends. Always returns one outcome per job.
    pub fn await_results(self) -> Vec<JobOutcome> {
        match self.thread.join() {
            Ok(outcomes) => outcomes,
            Err(_) => {
                warn!("batch thread terminated abnormally");
                self.placeholders
            }
        }
    }
}

pub fn submit_batch(
    runner: Arc<dyn JobRunner>,
    jobs: Vec<BatchJob>,
    options: BatchOptions,
) -> std::io::Result<BatchHandle> {
    submit_with_hub(runner, jobs, options, ProgressHub::new())
}

/// Like [`submit_batch`], with `callback` subscribed before the first job runs.
pub fn submit_batch_with_progress(
    runner: Arc<dyn JobRunner>,
    jobs: Vec<BatchJob>,
    options: BatchOptions,
    callback: ProgressCallback,
) -> std::io::Result<BatchHandle> {
    let hub = ProgressHub::new();
    hub.subscribe(callback);
    submit_with_hub(runner, jobs, options, hub)
}

fn submit_with_hub(
    runner: Arc<dyn JobRunner>,
    jobs: Vec<BatchJob>,
    options: BatchOptions,
    progress: ProgressHub,
) -> std::io::Result<BatchHandle> {
    let cancel = options.cancellation.unwrap_or_default();
    let placeholders = jobs
        .iter()
        .map(|job| JobOutcome::internal_failure(job, "batch thread terminated"))
        .collect();

    let total = jobs.len();
    let workers = options.workers;
    let thread_cancel = cancel.clone();
    let thread_progress = progress.clone();
    let thread = thread::Builder::new()
        .name("idphoto-batch".to_string())
        .spawn(move || run_batch(runner.as_ref(), &jobs, workers, &thread_cancel, &thread_progress))?;

    Ok(BatchHandle {
        total,
        cancel,
        progress,
        thread,
        placeholders,
    })
}

/// Per-status counts over a finished batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub jobs: usize,
    pub results: usize,
    pub by_status: BTreeMap<JobStatus, usize>,
    pub bytes_written: u64,
    pub originals_copied: usize,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[JobOutcome]) -> Self {
        let mut summary = Self {
            jobs: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            if outcome.original_copy.is_some() {
                summary.originals_copied += 1;
            }
            for result in &outcome.results {
                summary.results += 1;
                *summary.by_status.entry(result.status).or_insert(0) += 1;
                if result.status.is_success() {
                    summary.bytes_written += result.encoded_bytes.unwrap_or(0);
                }
            }
        }
        summary
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn succeeded(&self) -> usize {
        self.count(JobStatus::Success) + self.count(JobStatus::FaceNotFoundFallback)
    }

    pub fn failed(&self) -> usize {
        self.results - self.succeeded() - self.count(JobStatus::Cancelled)
    }

    pub fn success_rate(&self) -> f64 {
        if self.results == 0 {
            0.0
        } else {
            (self.succeeded() as f64 / self.results as f64) * 100.0
        }
    }
}
