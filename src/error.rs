//! Error types shared by every component of the runtime.
//!
//! Failures never escape the dispatch loop: they are either returned from the
//! operation that caused them, delivered through a [`Deferred`] outcome or a
//! task's error callback, or routed to the [`Diagnostics`] sink.
//!
//! [`Deferred`]: crate::deferred::Deferred
//! [`Diagnostics`]: crate::diagnostics::Diagnostics

use std::{any::Any, io, sync::Arc, thread::ThreadId};

/// Boxed error accepted from user computations and worker calls.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared error source, cheap to clone into several outcomes.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// An operation that requires the privileged thread was invoked elsewhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("expected to run on the main thread {expected:?}, called from {actual:?}")]
pub struct WrongThreadError {
    pub expected: ThreadId,
    pub actual: ThreadId,
}

/// A task's computation failed.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TaskError {
    /// The computation returned an error.
    #[error("task failed: {0}")]
    Failed(SharedError),

    /// The computation panicked while being polled.
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// A function submitted to the worker pool failed.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PoolSubmissionError {
    /// The function returned an error.
    #[error("worker call failed: {0}")]
    Failed(SharedError),

    /// The function panicked on the worker thread.
    #[error("worker call panicked: {0}")]
    Panicked(String),
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    WrongThread(#[from] WrongThreadError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    PoolSubmission(#[from] PoolSubmissionError),

    /// Cooperative cancellation. Never reported as a failure.
    #[error("operation was cancelled")]
    Cancelled,

    /// A `Deferred` was resolved a second time.
    #[error("deferred value is already resolved")]
    AlreadyResolved,

    #[error("operation timed out")]
    TimedOut,

    /// A scheduled callback panicked during a dispatch step.
    #[error("scheduled callback panicked: {0}")]
    CallbackPanicked(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start the worker pool: {0}")]
    PoolCreation(Arc<io::Error>),
}

impl Error {
    /// Returns `true` if this is the cancellation outcome.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl TaskError {
    pub(crate) fn from_boxed(error: BoxError) -> Self {
        TaskError::Failed(Arc::from(error))
    }

    /// Returns `true` if the computation bailed out with [`Error::Cancelled`].
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            TaskError::Failed(source) => source
                .downcast_ref::<Error>()
                .is_some_and(Error::is_cancelled),
            TaskError::Panicked(_) => false,
        }
    }
}

/// Extracts a readable message from a `catch_unwind` payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
