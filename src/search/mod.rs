//! Learning-rate search over external training processes
//!
//! Candidates are spread log-uniformly between two bounds, shuffled with a
//! fixed seed and handed out to a fixed number of worker slots. Each slot
//! runs one training process at a time; a finished slot picks up the next
//! candidate until none remain.

mod candidates;
mod supervisor;

pub use candidates::{log_space, shuffled_log_space};
pub use supervisor::{
    CommandLauncher, Job, JobLauncher, Launch, Outcome, SearchReport, Supervisor, DEFAULT_SLOTS,
};
