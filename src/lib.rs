// Library exports for reuse by the binary and other front ends
pub mod cli;
pub mod config_file;
pub mod error;
pub mod identity;
pub mod image_processing;
pub mod json_output;
pub mod matching;
pub mod organizer;
pub mod profile;
pub mod report;
pub mod roster;
pub mod utils;

// Re-export commonly used types
pub use error::{DetectorError, JobError, ProfileError};
pub use identity::{resolve_records, IdentityRecord, Resolution, ResolverOptions, TextCase};
pub use image_processing::batch::{
    run_batch, submit_batch, BatchHandle, BatchJob, BatchOptions, BatchSummary, CancellationToken,
    JobOutcome, JobRunner, ProgressEvent,
};
pub use image_processing::face_detection::{FaceLocator, FacePolicy, FaceRegion};
pub use image_processing::watermark::Watermark;
pub use image_processing::{JobStatus, ProcessingConfig, ProcessingEngine, ProcessingResult};
pub use json_output::JsonMessage;
pub use organizer::OutputLayout;
pub use profile::{ComplianceProfile, ProfileCatalog};
