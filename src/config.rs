use crate::error::{Error, Result};

/// Maximum number of tasks to allow queueing in the channel at once.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Tunables for an executor/spawner pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Bound of the completion queue. Producers block once this many tasks
    /// are waiting to be polled.
    pub queue_capacity: usize,
    /// Whether a panicking future is caught and dropped instead of tearing
    /// down the executor thread.
    pub catch_panics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            catch_panics: true,
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    #[must_use]
    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the queue capacity is zero. A
    /// rendezvous queue blocks every spawn made before the executor starts
    /// receiving, including ones on the thread that is about to run it.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue_capacity must be non-zero"));
        }
        Ok(())
    }
}
