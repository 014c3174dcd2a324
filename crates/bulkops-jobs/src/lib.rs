pub mod config;
pub mod engine;
pub mod executor;
pub mod guard;
pub mod job;
pub mod outcome;
pub mod progress;
pub mod scheduler;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use engine::{BulkJobRequest, JobEngine, SubmittedJob};
pub use executor::{ActionExecutor, ActionRegistry, HttpSessionExecutor, SessionAction};
pub use guard::DispatchGuard;
pub use job::{Job, JobPatch, JobProgress};
pub use scheduler::{BatchScheduler, RunOutcome};
pub use store::{FileJobStore, JobStore, MemoryJobStore};
pub use types::{JobItem, JobStatus};
