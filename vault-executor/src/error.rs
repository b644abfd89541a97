use thiserror::Error;
use vault_timers::QueueFull;

use crate::io::DriverError;

/// The failure type delivered to tasks and finalizers, and returned by the
/// scheduler's public operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The timer queue is at capacity. Surfaces synchronously from
    /// [`schedule`](crate::schedule) and [`Signal::send`](crate::Signal::send).
    #[error(transparent)]
    QueueFull(#[from] QueueFull),

    /// Cancellation marker: the task was [`close`](crate::close)d instead of
    /// finishing. Distinguishable from every ordinary failure.
    #[error("task was cancelled")]
    Cancelled,

    /// A race was started with no children left to run.
    #[error("race has no children to run")]
    EmptyRace,

    /// Fatal failure reported by the I/O driver; aborts
    /// [`run`](crate::run).
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Application-defined task failure.
    #[error("task failure: {0}")]
    Task(String),
}

impl Error {
    /// An application failure carrying a message.
    pub fn task(message: impl Into<String>) -> Self {
        Error::Task(message.into())
    }

    /// Whether this is the cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
