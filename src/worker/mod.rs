//! Background processing — queue, worker pool, retries, dead letters.

mod orchestrator;
mod retry;
mod task;

pub use orchestrator::{Orchestrator, TaskQueue, TaskRunner};
pub use retry::RetryPolicy;
pub use task::ProcessTask;
