//! Task scheduling subsystem
//!
//! Built around three pieces:
//! - `ScheduledTask`: the contract every job implements, with its own
//!   progress cell and cooperative cancel flag
//! - `registry`: the static table of task identifiers to constructors
//! - `TaskScheduler`: fires due tasks, runs manual triggers, tracks state
//!   and keeps the last result of every task

pub mod registry;
pub mod scheduler;
pub mod task;
pub mod tasks;
pub mod types;

pub use registry::{TaskDependencies, build_task, build_tasks, task_ids};
pub use scheduler::TaskScheduler;
pub use task::{ScheduledTask, TaskContext, merge_config};
pub use types::*;
