use dispatcher_types::BackendError;

/// Errors the dispatcher surfaces to callers.
///
/// `QueueFull` and `KeyNotFound`/`HandlerException` are recoverable — they
/// become a reply to the originating client. `InvariantViolation` is
/// not: it indicates a bug in the dispatcher itself and is meant to crash
/// the process with a diagnostic rather than be caught and ignored.
#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    /// A bounded queue was full when a producer tried to enqueue.
    #[error("{queue} is full (capacity {capacity})")]
    QueueFull { queue: &'static str, capacity: usize },

    /// A steady-state request handler raised an exception.
    #[error("request handler failed: {0}")]
    HandlerException(String),

    /// The build engine backend failed to execute a command.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A non-`Execution` request reached the raw work channel. This can only
    /// happen if something other than the Reader writes to it, which is a
    /// programming error, not a runtime condition to recover from.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

pub type DispatcherResult<T> = Result<T, DispatcherError>;
