//! A minimal cooperative executor.
//!
//! Futures are wrapped in [`Task`]s and sent through a completion
//! [`queue`] to a single [`Executor`]. A future that is not ready registers
//! its task's waker in some shared state (see [`completion`]); when the
//! background work finishes, waking moves the future into a successor task
//! that re-enters the queue and gets polled again.
//!
//! ```no_run
//! use std::time::Duration;
//! use wake_executor::{new_executor_and_spawner, TimerFuture};
//!
//! let (executor, spawner) = new_executor_and_spawner();
//! spawner.spawn(TimerFuture::new(Duration::from_secs(1)))?;
//! // the executor stops once no producer handle is left
//! spawner.close();
//!
//! for elapsed in executor.run() {
//!     println!("{elapsed:?} has expired!");
//! }
//! # Ok::<(), wake_executor::Error>(())
//! ```

pub mod completion;
mod config;
mod error;
pub mod executor;
pub mod queue;
pub mod task;
mod timer;

pub use config::{Config, DEFAULT_QUEUE_CAPACITY};
pub use error::{Error, Result};
pub use executor::{new_executor_and_spawner, with_config, Executor, RunSummary, Spawner, State};
pub use task::{Task, TaskId};
pub use timer::TimerFuture;
