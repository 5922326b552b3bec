//! The unit of scheduling.
//!
//! A [`Task`] owns a boxed future and a handle to the completion queue, and
//! doubles as the [`Waker`](std::task::Waker) handed to that future. Waking
//! does not push the same task back onto the queue. Instead the future is
//! moved out into a *successor* task (same [`TaskId`], next generation) and
//! the old task is retired for good. A retired task holds no future, so a
//! stale or duplicate wake has nothing left to reschedule.
//!
//! Scheduling never blocks the executor thread. While an executor runs, tasks
//! spawned or woken on its thread go onto its local run queue instead of the
//! completion queue, which only that thread drains.

use crate::error::{Error, Result};
use crate::queue::Sender;
use futures::future::BoxFuture;
use futures::task::{waker_ref, ArcWake};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};

/// Identifies a logical task across all of its successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

pub(crate) type TaskSender<T> = Sender<Arc<Task<T>>>;

/// Where a task goes when it is spawned or woken.
pub(crate) struct Scheduler<T> {
    task_sender: TaskSender<T>,
    local: Arc<LocalQueue<T>>,
}

/// Run queue owned by the thread currently running the executor.
///
/// That thread is the only consumer of the completion queue, so a blocking
/// send from it into a full queue would never return.
pub(crate) struct LocalQueue<T> {
    owner: Mutex<Option<ThreadId>>,
    tasks: Mutex<VecDeque<Arc<Task<T>>>>,
}

/// Marks the current thread as the executor thread until dropped.
pub(crate) struct OwnerGuard<'a, T> {
    queue: &'a LocalQueue<T>,
}

/// A future that can reschedule itself to be polled by an `Executor`.
pub struct Task<T> {
    id: TaskId,
    /// Number of wakes this logical task went through before this identity
    /// was created.
    generation: u64,
    /// In-progress future that should be pushed to completion.
    ///
    /// Only the executor thread polls, but wakes arrive from any thread, so
    /// the slot is guarded by a mutex. The lock is never held across a poll.
    slot: Mutex<Slot<T>>,
    /// Handle to place the successor back onto the task queue.
    scheduler: Scheduler<T>,
}

enum Slot<T> {
    /// Waiting for a wake.
    Idle(BoxFuture<'static, T>),
    /// The executor has the future out and is polling it.
    Polling,
    /// Woken while being polled; the executor reschedules after the poll.
    Notified,
    /// The future moved on to a successor, finished, or panicked.
    Retired,
}

/// Outcome of a single [`Task::poll`].
#[derive(Debug)]
pub enum TaskPoll<T> {
    Ready(T),
    Pending,
    /// The future panicked and was dropped.
    Panicked,
    /// This task identity no longer owns a future.
    Retired,
}

fn lock<U>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// === impl Scheduler ===

impl<T> Scheduler<T> {
    pub(crate) fn new(task_sender: TaskSender<T>, local: Arc<LocalQueue<T>>) -> Self {
        Self { task_sender, local }
    }
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            task_sender: self.task_sender.clone(),
            local: Arc::clone(&self.local),
        }
    }
}

impl<T> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("task_sender", &self.task_sender)
            .field("local", &self.local)
            .finish()
    }
}

// === impl LocalQueue ===

impl<T> LocalQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn enter(&self) -> OwnerGuard<'_, T> {
        *lock(&self.owner) = Some(thread::current().id());
        OwnerGuard { queue: self }
    }

    fn is_owner(&self) -> bool {
        *lock(&self.owner) == Some(thread::current().id())
    }

    pub(crate) fn push(&self, task: Arc<Task<T>>) {
        lock(&self.tasks).push_back(task);
    }

    pub(crate) fn pop(&self) -> Option<Arc<Task<T>>> {
        lock(&self.tasks).pop_front()
    }

    /// Drops every queued task. The tasks are dropped after the lock is
    /// released, since dropping a future may wake other tasks.
    pub(crate) fn clear(&self) {
        let tasks = mem::take(&mut *lock(&self.tasks));
        drop(tasks);
    }
}

impl<T> fmt::Debug for LocalQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalQueue")
            .field("owner", &*lock(&self.owner))
            .field("len", &lock(&self.tasks).len())
            .finish()
    }
}

impl<T> Drop for OwnerGuard<'_, T> {
    fn drop(&mut self) {
        *lock(&self.queue.owner) = None;
    }
}

// === impl TaskId ===

impl TaskId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

// === impl Task ===

impl<T: Send + 'static> Task<T> {
    pub(crate) fn new(future: BoxFuture<'static, T>, scheduler: Scheduler<T>) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::next(),
            generation: 0,
            slot: Mutex::new(Slot::Idle(future)),
            scheduler,
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Sends this task onto the completion queue, or onto the local run
    /// queue when called from the executor thread.
    ///
    /// Only the local path is guaranteed not to block; other threads wait
    /// while the completion queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] if the queue no longer accepts tasks.
    /// The task, and the future it owns, is dropped in that case.
    pub(crate) fn schedule(self: Arc<Self>) -> Result<()> {
        let id = self.id;
        let Scheduler { task_sender, local } = self.scheduler.clone();

        if local.is_owner() {
            if task_sender.is_closed() {
                return Err(Error::QueueClosed(id));
            }
            tracing::trace!(task = %id, "scheduling on the local run queue");
            local.push(self);
            return Ok(());
        }

        task_sender
            .send(self)
            .map_err(|_task| Error::QueueClosed(id))
    }

    /// Reschedules the future owned by this task.
    ///
    /// This is what waking the task does. If the task is idle, its future is
    /// moved into a successor which is sent onto the queue and this task is
    /// retired. If the task is being polled right now, the successor is
    /// created once the poll returns. Waking a retired or already notified
    /// task does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] if the successor could not be sent.
    pub fn reschedule(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.lock_slot();
        match mem::replace(&mut *slot, Slot::Retired) {
            Slot::Idle(future) => {
                drop(slot);
                self.successor(future).schedule()
            }
            Slot::Polling => {
                tracing::trace!(task = %self.id, "woken while polling");
                *slot = Slot::Notified;
                Ok(())
            }
            prev @ (Slot::Notified | Slot::Retired) => {
                tracing::trace!(task = %self.id, "ignoring duplicate wake");
                *slot = prev;
                Ok(())
            }
        }
    }

    /// Polls the owned future once, using this task as the waker.
    ///
    /// Panics raised by the future are caught when `catch_panics` is set;
    /// the future is dropped and [`TaskPoll::Panicked`] is returned.
    pub fn poll(self: &Arc<Self>, catch_panics: bool) -> TaskPoll<T> {
        let mut future = {
            let mut slot = self.lock_slot();
            match mem::replace(&mut *slot, Slot::Polling) {
                Slot::Idle(future) => future,
                prev => {
                    *slot = prev;
                    return TaskPoll::Retired;
                }
            }
        };

        let waker = waker_ref(self);
        let cx = &mut Context::from_waker(&waker);
        let poll = AssertUnwindSafe(|| future.as_mut().poll(cx));
        let result = if catch_panics {
            panic::catch_unwind(poll)
        } else {
            Ok(poll())
        };

        match result {
            Ok(Poll::Ready(output)) => {
                *self.lock_slot() = Slot::Retired;
                TaskPoll::Ready(output)
            }
            Ok(Poll::Pending) => {
                let mut slot = self.lock_slot();
                if matches!(*slot, Slot::Notified) {
                    *slot = Slot::Retired;
                    drop(slot);
                    if let Err(err) = self.successor(future).schedule() {
                        tracing::error!(%err, "failed to reschedule task woken during poll");
                    }
                } else {
                    *slot = Slot::Idle(future);
                }
                TaskPoll::Pending
            }
            Err(payload) => {
                *self.lock_slot() = Slot::Retired;
                drop(future);
                tracing::error!(
                    task = %self.id,
                    panic = panic_message(payload.as_ref()),
                    "task panicked during poll"
                );
                TaskPoll::Panicked
            }
        }
    }

    fn successor(&self, future: BoxFuture<'static, T>) -> Arc<Self> {
        tracing::trace!(task = %self.id, generation = self.generation + 1, "creating successor");
        Arc::new(Self {
            id: self.id,
            generation: self.generation + 1,
            slot: Mutex::new(Slot::Idle(future)),
            scheduler: self.scheduler.clone(),
        })
    }
}

impl<T> Task<T> {
    // The slot only ever holds a plain state value, a panic elsewhere cannot
    // leave it half-written.
    fn lock_slot(&self) -> MutexGuard<'_, Slot<T>> {
        lock(&self.slot)
    }
}

impl<T: Send + 'static> ArcWake for Task<T> {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        tracing::trace!(task = %arc_self.id, "Task::wake_by_ref");
        if let Err(err) = arc_self.reschedule() {
            tracing::error!(%err, "failed to reschedule woken task");
        }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        tracing::trace!(task = %self.id, generation = self.generation, "dropping task");
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.lock_slot() {
            Slot::Idle(_) => "Idle",
            Slot::Polling => "Polling",
            Slot::Notified => "Notified",
            Slot::Retired => "Retired",
        };
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}
