//! Stage-agnostic fan-out primitives: the executor and its batch retry tier.

mod coordinator;
mod executor;
mod item;

pub use coordinator::BatchOutcome;
pub use executor::BatchExecutor;
pub use item::{ItemResult, RetryPolicy, WorkItem};
