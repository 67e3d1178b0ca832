// Port Layer - Interfaces for external dependencies

pub mod clock; // For deterministic testing
pub mod job;
pub mod task_run_recorder;

// Re-exports
pub use clock::{Clock, SystemClock};
pub use job::{FnJob, Job, JobError};
pub use task_run_recorder::TaskRunRecorder;
