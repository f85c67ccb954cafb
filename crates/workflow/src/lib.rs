//! Dependency-aware workflow executor.
//!
//! Accepts process requests, validates step preconditions, dispatches work
//! to the engine collaborators under per-kind concurrency slots, retries
//! transient collaborator failures with backoff, and keeps history, vector
//! index, and progress bus consistent with each other.

mod outcome;
mod prompts;
mod scheduler;
mod steps;

pub use outcome::{ErrorCode, ProcessOutcome, ProcessRequest, StepOutcome, StepRequest};
pub use prompts::SUMMARY_SECTIONS;
pub use scheduler::{Scheduler, WorkflowSettings};
