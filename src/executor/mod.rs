//! Delivery worker pool with pause/resume.
//!
//! Workers check a dispatch gate before dequeuing, so a paused pool keeps
//! accepting tasks but starts none of them until resumed.

mod pausable;
mod task_executor;

pub use pausable::PausableExecutor;
pub use task_executor::{ExecutorState, Task, TaskExecutor};
