//! Dynamic scheduler
//!
//! A fixed pool of worker threads pulls input items from a shared queue, so
//! fast workers take more items than slow ones when per-item cost varies.
//! Each worker owns one [`Task`] instance; outputs are collected on a second
//! queue in completion order.

use super::task::{SchedulerState, Task, TaskOutput};
use chorus_common::{ChorusError, Result};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

struct Inner<I, O, T> {
    state: SchedulerState,
    tasks: Vec<T>,
    input_tx: Option<Sender<I>>,
    workers: Vec<JoinHandle<T>>,
    output_rx: Receiver<TaskOutput<I, O>>,
    /// Bumped on every start, when `output_rx` is replaced
    batch: u64,
}

/// Work-stealing style scheduler over a fixed set of [`Task`] instances.
///
/// States move `Init -> Running -> Stopping -> Stopped`; a stopped scheduler
/// can be started again for another batch. Outputs that were not claimed
/// before a restart stay available.
pub struct DynamicScheduler<I, O, T> {
    inner: Mutex<Inner<I, O, T>>,
}

impl<I, O, T> DynamicScheduler<I, O, T>
where
    I: Send + 'static,
    O: Send + 'static,
    T: Task<I, O> + 'static,
{
    /// Create a scheduler with one worker per task instance.
    pub fn new(tasks: Vec<T>) -> Self {
        // No sender exists yet, so waiting before the first start returns
        // the completion sentinel instead of blocking.
        let (_, output_rx) = channel::unbounded();
        Self {
            inner: Mutex::new(Inner {
                state: SchedulerState::Init,
                tasks,
                input_tx: None,
                workers: Vec::new(),
                output_rx,
                batch: 0,
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    pub fn num_workers(&self) -> usize {
        let inner = self.inner.lock();
        inner.tasks.len() + inner.workers.len()
    }

    /// Spawn one thread per task and begin accepting input.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            SchedulerState::Init | SchedulerState::Stopped => {}
            state => {
                return Err(ChorusError::invalid_state(format!(
                    "cannot start scheduler in state {:?}",
                    state
                )));
            }
        }
        if inner.tasks.is_empty() {
            return Err(ChorusError::invalid_state(
                "cannot start scheduler without tasks",
            ));
        }

        let (input_tx, input_rx) = channel::unbounded::<I>();
        let (output_tx, output_rx) = channel::unbounded::<TaskOutput<I, O>>();
        for leftover in inner.output_rx.try_iter() {
            let _ = output_tx.send(leftover);
        }
        inner.output_rx = output_rx;
        inner.batch += 1;

        let mut pending = std::mem::take(&mut inner.tasks).into_iter();
        let mut workers = Vec::with_capacity(pending.len());
        let mut id = 0;
        #[allow(clippy::while_let_on_iterator)]
        while let Some(task) = pending.next() {
            let input_rx = input_rx.clone();
            let output_tx = output_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("chorus-worker-{}", id))
                .spawn(move || worker_loop(id, task, input_rx, output_tx));
            match spawned {
                Ok(handle) => {
                    workers.push(handle);
                    id += 1;
                }
                Err(e) => {
                    error!("failed to spawn scheduler worker {}: {}", id, e);
                    // Unwind the partial pool; the task owned by the failed
                    // spawn is gone.
                    drop(input_tx);
                    let mut tasks = join_workers(workers);
                    tasks.extend(pending);
                    inner.tasks = tasks;
                    inner.state = SchedulerState::Stopped;
                    return Err(ChorusError::task_execution_error_with_source(
                        format!("failed to spawn worker {}", id),
                        e,
                    ));
                }
            }
        }

        info!("dynamic scheduler started with {} workers", workers.len());
        inner.workers = workers;
        inner.input_tx = Some(input_tx);
        inner.state = SchedulerState::Running;
        Ok(())
    }

    /// Enqueue one item. Only valid while running.
    pub fn submit(&self, item: I) -> Result<()> {
        let inner = self.inner.lock();
        let input_tx = running_input(&*inner)?;
        input_tx
            .send(item)
            .map_err(|_| ChorusError::invalid_state("scheduler workers have exited"))
    }

    /// Enqueue every item of `items` in order. Only valid while running.
    pub fn submit_all<It>(&self, items: It) -> Result<()>
    where
        It: IntoIterator<Item = I>,
    {
        let inner = self.inner.lock();
        let input_tx = running_input(&*inner)?;
        for item in items {
            input_tx
                .send(item)
                .map_err(|_| ChorusError::invalid_state("scheduler workers have exited"))?;
        }
        Ok(())
    }

    /// Close the input queue and wait for the workers to drain it.
    ///
    /// In-flight `run` calls are not interrupted. Stopping an already
    /// stopped scheduler is a no-op.
    pub fn stop(&self) -> Result<()> {
        let workers = {
            let mut inner = self.inner.lock();
            match inner.state {
                SchedulerState::Running => {}
                SchedulerState::Stopped => return Ok(()),
                state => {
                    return Err(ChorusError::invalid_state(format!(
                        "cannot stop scheduler in state {:?}",
                        state
                    )));
                }
            }
            inner.state = SchedulerState::Stopping;
            inner.input_tx = None;
            std::mem::take(&mut inner.workers)
        };

        debug!("waiting for {} scheduler workers to drain", workers.len());
        let tasks = join_workers(workers);

        let mut inner = self.inner.lock();
        inner.tasks = tasks;
        inner.state = SchedulerState::Stopped;
        info!("dynamic scheduler stopped");
        Ok(())
    }

    /// Whether an output is ready to be claimed without blocking.
    pub fn has_output(&self) -> bool {
        !self.inner.lock().output_rx.is_empty()
    }

    /// Block until an output is available.
    ///
    /// Returns `None` once the scheduler has been stopped and every output
    /// has been claimed.
    pub fn wait_for_output(&self) -> Option<TaskOutput<I, O>> {
        let (output_rx, batch) = self.current_outputs();
        self.wait_on(output_rx, batch)
    }

    fn current_outputs(&self) -> (Receiver<TaskOutput<I, O>>, u64) {
        let inner = self.inner.lock();
        (inner.output_rx.clone(), inner.batch)
    }

    fn wait_on(
        &self,
        mut output_rx: Receiver<TaskOutput<I, O>>,
        mut batch: u64,
    ) -> Option<TaskOutput<I, O>> {
        loop {
            if let Ok(output) = output_rx.recv() {
                return Some(output);
            }
            // The queue closed. Follow a restart that replaced it meanwhile.
            let (current_rx, current_batch) = self.current_outputs();
            if current_batch == batch {
                return None;
            }
            output_rx = current_rx;
            batch = current_batch;
        }
    }

    /// Claim every output that is ready now.
    pub fn drain_outputs(&self) -> Vec<TaskOutput<I, O>> {
        let output_rx = self.inner.lock().output_rx.clone();
        output_rx.try_iter().collect()
    }

    /// Access the task instances, for example to read accumulated state.
    ///
    /// Tasks live on their worker threads while running, so this fails
    /// unless the scheduler is stopped or not yet started.
    pub fn tasks(&self) -> Result<MappedMutexGuard<'_, Vec<T>>> {
        let inner = self.inner.lock();
        match inner.state {
            SchedulerState::Init | SchedulerState::Stopped => {
                Ok(MutexGuard::map(inner, |inner| &mut inner.tasks))
            }
            state => Err(ChorusError::invalid_state(format!(
                "tasks are owned by workers in state {:?}",
                state
            ))),
        }
    }

    /// Stop if needed and hand back the task instances.
    pub fn into_tasks(mut self) -> Result<Vec<T>> {
        self.stop_if_running()?;
        Ok(std::mem::take(&mut self.inner.get_mut().tasks))
    }

    fn stop_if_running(&self) -> Result<()> {
        if self.state().is_running() {
            self.stop()?;
        }
        Ok(())
    }
}

fn running_input<I, O, T>(inner: &Inner<I, O, T>) -> Result<&Sender<I>> {
    match (&inner.state, &inner.input_tx) {
        (SchedulerState::Running, Some(input_tx)) => Ok(input_tx),
        (state, _) => Err(ChorusError::invalid_state(format!(
            "cannot submit while scheduler is {:?}",
            state
        ))),
    }
}

fn join_workers<T>(workers: Vec<JoinHandle<T>>) -> Vec<T> {
    let mut tasks = Vec::with_capacity(workers.len());
    for handle in workers {
        let name = handle.thread().name().unwrap_or("worker").to_string();
        match handle.join() {
            Ok(task) => tasks.push(task),
            Err(_) => error!("{} terminated abnormally, its task is lost", name),
        }
    }
    tasks
}

fn worker_loop<I, O, T>(
    id: usize,
    mut task: T,
    input_rx: Receiver<I>,
    output_tx: Sender<TaskOutput<I, O>>,
) -> T
where
    T: Task<I, O>,
{
    let mut processed = 0usize;
    // recv fails once the input queue is closed and drained
    while let Ok(input) = input_rx.recv() {
        let result = match panic::catch_unwind(AssertUnwindSafe(|| task.run(&input))) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => {
                warn!("task on worker {} failed: {:#}", id, e);
                Err(ChorusError::task_execution_error_with_source(
                    format!("task on worker {} failed", id),
                    e,
                ))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("task on worker {} panicked: {}", id, message);
                Err(ChorusError::task_execution_error(format!(
                    "task on worker {} panicked: {}",
                    id, message
                )))
            }
        };
        processed += 1;
        if output_tx.send(TaskOutput { input, result }).is_err() {
            break;
        }
    }
    debug!("worker {} exiting after {} items", id, processed);
    task
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl<I, O, T> Drop for DynamicScheduler<I, O, T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        inner.input_tx = None;
        let workers = std::mem::take(&mut inner.workers);
        if !workers.is_empty() {
            join_workers(workers);
        }
    }
}
