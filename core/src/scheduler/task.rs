//! Units of work executed by the [`DynamicScheduler`](super::DynamicScheduler).

use chorus_common::Result;

/// A handler bound to one scheduler worker thread.
///
/// Each worker owns one instance for its whole lifetime, so implementations
/// may keep private accumulator state and expose it once the scheduler has
/// been stopped.
pub trait Task<I, O>: Send {
    fn run(&mut self, input: &I) -> anyhow::Result<O>;
}

impl<I, O, F> Task<I, O> for F
where
    F: FnMut(&I) -> anyhow::Result<O> + Send,
{
    fn run(&mut self, input: &I) -> anyhow::Result<O> {
        self(input)
    }
}

/// The outcome of running one submitted item.
#[derive(Debug)]
pub struct TaskOutput<I, O> {
    pub input: I,
    /// `Err(TaskExecution)` when `run` failed or panicked for this item
    pub result: Result<O>,
}

impl<I, O> TaskOutput<I, O> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Lifecycle of a [`DynamicScheduler`](super::DynamicScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Init,
    Running,
    Stopping,
    Stopped,
}

impl SchedulerState {
    pub fn is_running(&self) -> bool {
        matches!(self, SchedulerState::Running)
    }
}
