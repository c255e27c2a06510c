//! Intra-worker task scheduling
//!
//! This module provides the dynamic scheduler that balances variable-cost
//! work items over a fixed pool of threads, each bound to its own task.

pub mod dynamic_scheduler;
pub mod task;

pub use dynamic_scheduler::DynamicScheduler;
pub use task::{SchedulerState, Task, TaskOutput};
