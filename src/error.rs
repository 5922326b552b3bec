use crate::task::TaskId;
use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The completion queue was closed before the task could be (re)scheduled.
    #[error("completion queue is closed, {0} was not scheduled")]
    QueueClosed(TaskId),
    /// The OS refused to start the background thread backing a timer.
    #[error("failed to spawn timer thread")]
    TimerThread(#[source] std::io::Error),
    #[error("invalid executor configuration: {0}")]
    InvalidConfig(&'static str),
}
