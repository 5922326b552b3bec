//! Shared completion state between a future and the background work it is
//! waiting on.
//!
//! [`pair`] hands out the two sides: the [`Completion`] lives inside the
//! future and is checked on every poll, the [`Completer`] travels to the
//! producer (a timer thread, an IO callback, ...) and fires exactly once.
//! Both point at the same lock-guarded [`SharedState`], which stays alive for
//! as long as either side does.
//!
//! # Lost wakeups
//!
//! If the producer completes while no waker is registered, nobody is woken.
//! This happens when the future was never polled, or was polled to `Ready`
//! already. A future that is polled after that simply observes `completed`
//! and returns `Ready`; a future that is never polled again never resumes
//! through this path. [`Completer::complete`] reports this case by
//! returning `false`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

/// State shared between a future and the thread completing it.
#[derive(Debug, Default)]
struct SharedState {
    /// Whether the background operation has finished.
    completed: bool,

    /// The waker for the task the future was last polled on. The producer
    /// uses this after setting `completed = true` to tell that task to wake
    /// up, see that `completed = true`, and move forward.
    waker: Option<Waker>,
}

/// Future-side handle to the shared completion state.
///
/// Not `Clone`: exactly one future owns it, so exactly one waker is ever
/// registered.
#[derive(Debug)]
pub struct Completion {
    shared: Arc<Mutex<SharedState>>,
}

/// Producer-side handle to the shared completion state.
///
/// Completing consumes the handle, so an operation completes at most once.
#[derive(Debug)]
#[must_use = "dropping a `Completer` without completing abandons the waiting task"]
pub struct Completer {
    shared: Arc<Mutex<SharedState>>,
    done: bool,
}

pub fn pair() -> (Completer, Completion) {
    let shared = Arc::new(Mutex::new(SharedState::default()));
    let completer = Completer {
        shared: Arc::clone(&shared),
        done: false,
    };
    (completer, Completion { shared })
}

// Every critical section is a couple of plain assignments, so the state is
// consistent even if some other holder panicked.
fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

// === impl Completion ===

impl Completion {
    /// Returns `Ready` once the producer has completed. Otherwise registers
    /// the waker from `cx`, replacing any earlier one, and returns `Pending`.
    ///
    /// Checking and registering happen under one lock, so a completion can
    /// never slip in between the two.
    pub fn poll_completed(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut shared = lock(&self.shared);
        if shared.completed {
            return Poll::Ready(());
        }

        // The future can move between tasks on the executor (every wake
        // produces a successor task), so the registered waker must be
        // refreshed on every poll or it would point at a retired task.
        let stale = shared
            .waker
            .as_ref()
            .map_or(true, |waker| !waker.will_wake(cx.waker()));
        if stale {
            shared.waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }

    pub fn is_completed(&self) -> bool {
        lock(&self.shared).completed
    }
}

// === impl Completer ===

impl Completer {
    /// Marks the operation as completed and wakes the registered waker, if
    /// any.
    ///
    /// The waker is taken under the lock but invoked after releasing it, so
    /// a waker that re-enters the shared state cannot deadlock.
    ///
    /// Returns `false` if no waker was registered (see the
    /// [module docs](self#lost-wakeups)).
    pub fn complete(mut self) -> bool {
        self.done = true;

        let waker = {
            let mut shared = lock(&self.shared);
            shared.completed = true;
            shared.waker.take()
        };

        match waker {
            Some(waker) => {
                tracing::trace!("completed, waking registered task");
                waker.wake();
                true
            }
            None => {
                tracing::debug!("completed with no registered waker");
                false
            }
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        // Release the waiting task instead of keeping it (and the queue
        // sender it owns) alive forever.
        let waker = lock(&self.shared).waker.take();
        if waker.is_some() {
            tracing::warn!("completer dropped before completing, abandoning the waiting task");
        }
        drop(waker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::{noop_waker, waker, ArcWake};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Default)]
    struct CountingWaker {
        wakes: AtomicUsize,
    }

    impl ArcWake for CountingWaker {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.wakes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn completion_before_any_poll_wakes_nobody() {
        let (completer, completion) = pair();

        assert!(!completer.complete());
        assert!(completion.is_completed());

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(completion.poll_completed(&mut cx), Poll::Ready(()));
    }

    #[test]
    fn registered_waker_is_woken_once() {
        let (completer, completion) = pair();
        let counter = Arc::new(CountingWaker::default());
        let waker = waker(counter.clone());
        let mut cx = Context::from_waker(&waker);

        assert_eq!(completion.poll_completed(&mut cx), Poll::Pending);
        assert!(completer.complete());
        assert_eq!(counter.wakes.load(Ordering::SeqCst), 1);

        assert_eq!(completion.poll_completed(&mut cx), Poll::Ready(()));
        assert_eq!(counter.wakes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn later_poll_replaces_registered_waker() {
        let (completer, completion) = pair();
        let first = Arc::new(CountingWaker::default());
        let second = Arc::new(CountingWaker::default());

        let first_waker = waker(first.clone());
        let second_waker = waker(second.clone());
        assert!(completion.poll_completed(&mut Context::from_waker(&first_waker)).is_pending());
        assert!(completion.poll_completed(&mut Context::from_waker(&second_waker)).is_pending());

        assert!(completer.complete());
        assert_eq!(first.wakes.load(Ordering::SeqCst), 0);
        assert_eq!(second.wakes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_completer_releases_the_waker() {
        let (completer, completion) = pair();
        let counter = Arc::new(CountingWaker::default());
        let waker = waker(counter.clone());
        assert!(completion.poll_completed(&mut Context::from_waker(&waker)).is_pending());
        drop(waker);
        assert_eq!(Arc::strong_count(&counter), 2);

        drop(completer);
        assert_eq!(Arc::strong_count(&counter), 1);
        assert_eq!(counter.wakes.load(Ordering::SeqCst), 0);
        assert!(!completion.is_completed());
    }

    static_assertions::assert_not_impl_any!(Completion: Clone);
    static_assertions::assert_impl_all!(Completion: Send, Sync);

    #[test]
    fn state_outlives_the_future_side() {
        let (completer, completion) = pair();
        drop(completion);

        thread::spawn(move || completer.complete())
            .join()
            .map(|woken| assert!(!woken))
            .unwrap();
    }
}
