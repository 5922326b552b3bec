use crate::config::Config;
use crate::error::Result;
use crate::queue::{self, Receiver, RecvError};
use crate::task::{LocalQueue, Scheduler, Task, TaskId, TaskPoll};
use futures::future::FutureExt;
use std::cell::Cell;
use std::future::Future;
use std::sync::Arc;

/// Lifecycle of an [`Executor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Stopped,
}

/// Counters collected over one [`Executor::run_with`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of tasks taken off the queue and polled.
    pub polls: usize,
    /// Number of tasks that resolved.
    pub completed: usize,
    /// Number of tasks dropped because their future panicked.
    pub panicked: usize,
}

/// Task executor that receives tasks off of a channel and runs them.
///
/// There is exactly one executor per queue, and it is driven from a single
/// thread. Tasks spawned or woken on that thread while it runs are kept on a
/// local run queue, so the executor never waits on its own completion queue.
#[derive(Debug)]
pub struct Executor<T> {
    ready_queue: Receiver<Arc<Task<T>>>,
    local: Arc<LocalQueue<T>>,
    catch_panics: bool,
    state: Cell<State>,
}

/// `Spawner` spawns new futures onto the task channel.
///
/// Cloning a spawner hands out another producer handle; every clone may be
/// moved to and used from a different thread.
#[derive(Debug)]
pub struct Spawner<T> {
    scheduler: Scheduler<T>,
}

/// Creates an executor and its spawner with the default [`Config`].
pub fn new_executor_and_spawner<T: Send + 'static>() -> (Executor<T>, Spawner<T>) {
    Executor::with_spawner(Config::default())
}

/// Creates an executor and its spawner from `config`.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) if `config`
/// does not validate.
pub fn with_config<T: Send + 'static>(config: Config) -> Result<(Executor<T>, Spawner<T>)> {
    config.validate()?;
    Ok(Executor::with_spawner(config))
}

// === impl Executor ===

impl<T: Send + 'static> Executor<T> {
    fn with_spawner(config: Config) -> (Self, Spawner<T>) {
        let (task_sender, ready_queue) = queue::channel(config.queue_capacity);
        let local = Arc::new(LocalQueue::new());
        let executor = Self {
            ready_queue,
            local: Arc::clone(&local),
            catch_panics: config.catch_panics,
            state: Cell::new(State::Running),
        };
        let spawner = Spawner {
            scheduler: Scheduler::new(task_sender, local),
        };
        (executor, spawner)
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    /// Runs until the queue is closed, handing every resolved output to
    /// `on_ready` in completion order.
    ///
    /// The queue closes once the spawner and every task still waiting to be
    /// woken are gone, so this returns after the last outstanding task
    /// resolved. A task that returns `Pending` is not put back by the
    /// executor; whoever wakes it sends its successor.
    pub fn run_with<F>(&self, mut on_ready: F) -> RunSummary
    where
        F: FnMut(TaskId, T),
    {
        let _span = tracing::info_span!("executor").entered();
        let _owner = self.local.enter();
        let mut summary = RunSummary::default();

        while self.state.get() == State::Running {
            let Some(task) = self.next_task() else {
                tracing::debug!("task queue closed, stopping");
                self.state.set(State::Stopped);
                break;
            };

            tracing::trace!(task = %task.id(), generation = task.generation(), "received task");
            summary.polls += 1;

            match task.poll(self.catch_panics) {
                TaskPoll::Ready(output) => {
                    tracing::debug!(task = %task.id(), "task completed");
                    summary.completed += 1;
                    on_ready(task.id(), output);
                }
                TaskPoll::Pending => {
                    tracing::trace!(task = %task.id(), "task pending");
                }
                TaskPoll::Panicked => summary.panicked += 1,
                TaskPoll::Retired => {
                    tracing::warn!(task = %task.id(), "received a retired task");
                }
            }
        }

        tracing::debug!(?summary, "executor finished");
        summary
    }

    /// Takes the next task to poll, or `None` once the queue is closed and
    /// nothing is left locally.
    ///
    /// Tasks already waiting in the completion queue go ahead of locally
    /// rescheduled ones, so a task that keeps waking itself cannot starve
    /// other producers.
    fn next_task(&self) -> Option<Arc<Task<T>>> {
        let Some(local) = self.local.pop() else {
            return match self.ready_queue.recv() {
                Ok(task) => Some(task),
                Err(RecvError::Closed) => None,
            };
        };

        match self.ready_queue.try_recv() {
            Ok(queued) => {
                self.local.push(local);
                Some(queued)
            }
            Err(_) => Some(local),
        }
    }

    /// Runs until the queue is closed and returns every output in the order
    /// the tasks completed.
    pub fn run(&self) -> Vec<T> {
        let mut outputs = Vec::new();
        self.run_with(|_, output| outputs.push(output));
        outputs
    }
}

impl<T> Drop for Executor<T> {
    fn drop(&mut self) {
        // Tasks left on the local run queue own queue senders of their own.
        self.local.clear();
    }
}

// === impl Spawner ===

impl<T: Send + 'static> Spawner<T> {
    /// Wraps `future` in a new task and sends it to the executor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`](crate::Error::QueueClosed) if the
    /// executor is gone or the queue has been closed.
    pub fn spawn(&self, future: impl Future<Output = T> + Send + 'static) -> Result<TaskId> {
        let task = Task::new(future.boxed(), self.scheduler.clone());
        let id = task.id();
        task.schedule()?;
        tracing::trace!(task = %id, "spawned");
        Ok(id)
    }

    /// Releases this producer handle.
    ///
    /// The executor stops once every spawner clone is closed (or dropped)
    /// and all tasks spawned so far have resolved.
    pub fn close(self) {
        tracing::debug!("closing spawner");
        drop(self);
    }
}

impl<T> Clone for Spawner<T> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
        }
    }
}
