//! Shared progress contracts for the orchestration core.
//!
//! This crate defines the formal contracts (DTOs) that flow between the
//! scheduler, the engine collaborators, and WebSocket subscribers. Using
//! shared tagged types instead of loose JSON objects prevents runtime
//! deserialization errors from mismatched field names.
//!
//! Also provides the `ProgressBus`, the in-memory fan-out that delivers
//! per-task progress to all connected subscribers.

mod bus;
mod event;

pub use bus::{ProgressBus, ProgressSubscription, DEFAULT_BUS_CAPACITY};
pub use event::{ProgressEvent, StepKind, TerminalKind};
