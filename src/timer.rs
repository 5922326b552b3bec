use crate::completion::{self, Completion};
use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

/// A future that completes once `duration` has elapsed.
///
/// The waiting happens on a dedicated background thread, `poll` itself
/// never blocks. Resolves to the duration it was created with; polling again
/// after that keeps returning the same value.
#[derive(Debug)]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct TimerFuture {
    duration: Duration,
    completion: Completion,
}

impl TimerFuture {
    /// Create a new `TimerFuture` which will complete after the provided
    /// timeout.
    ///
    /// # Panics
    ///
    /// Panics if the OS fails to spawn the timer thread, like
    /// [`std::thread::spawn`]. Use [`TimerFuture::try_new`] to handle that.
    pub fn new(duration: Duration) -> Self {
        Self::try_new(duration)
            .unwrap_or_else(|err| panic!("failed to spawn timer thread: {err}"))
    }

    /// Fallible version of [`TimerFuture::new`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimerThread`] if the timer thread cannot be spawned.
    pub fn try_new(duration: Duration) -> Result<Self> {
        let (completer, completion) = completion::pair();
        thread::Builder::new()
            .name(format!("timer-{}ms", duration.as_millis()))
            .spawn(move || {
                thread::sleep(duration);
                tracing::trace!(?duration, "timer elapsed");
                completer.complete();
            })
            .map_err(Error::TimerThread)?;

        Ok(Self {
            duration,
            completion,
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

// Allows us to use `.await` on a `TimerFuture`
impl Future for TimerFuture {
    type Output = Duration;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        tracing::trace!(duration = ?self.duration, "TimerFuture::poll");
        self.completion
            .poll_completed(cx)
            .map(|()| self.duration)
    }
}
