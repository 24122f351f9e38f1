//! Error types for suspended asynchronous operations.

use std::sync::Arc;

/// Errors surfaced through suspended asynchronous operations.
///
/// A suspension resolves either with a value, with [`TaskError::Cancelled`]
/// when its cancel scope fires, or with an adapter error when the underlying
/// work fails for a real reason (network failure, queue shutdown, ...).
///
/// The enum is `Clone` because cancellation may deliver the same error to a
/// failure closure more than once; adapter payloads are `Arc`-shared.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::TaskError;
///
/// let cancelled = TaskError::Cancelled;
/// assert!(cancelled.is_cancelled());
///
/// let io = TaskError::adapter(std::io::Error::new(
///     std::io::ErrorKind::ConnectionReset,
///     "connection reset by peer",
/// ));
/// assert!(!io.is_cancelled());
/// println!("{}", io);
/// ```
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// The operation's cancel scope was cancelled, explicitly or by timeout.
    #[error("task was cancelled")]
    Cancelled,
    /// The underlying work surfaced a real failure.
    #[error("async operation failed: {0}")]
    Adapter(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

/// Plain-text adapter failure used when no richer error type is at hand.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
struct MessageError(String);

impl TaskError {
    /// Wraps an arbitrary error surfaced by a cancellable's underlying work.
    pub fn adapter<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TaskError::Adapter(Arc::new(err))
    }

    /// Builds an adapter error from a plain message.
    pub fn message(msg: impl Into<String>) -> Self {
        TaskError::Adapter(Arc::new(MessageError(msg.into())))
    }

    /// Returns true for the [`TaskError::Cancelled`] variant.
    ///
    /// Error precedence in suspension frames hinges on this predicate: a
    /// non-cancelled error always supersedes a previously recorded
    /// cancellation, never the other way around.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// Result type for suspended operations.
///
/// A convenience alias used throughout ferrous-scope, following the common
/// pattern of a crate-specific Result to reduce signature boilerplate.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{TaskError, TaskResult};
///
/// fn fetch() -> TaskResult<String> {
///     Err(TaskError::Cancelled)
/// }
///
/// match fetch() {
///     Ok(body) => println!("got {}", body),
///     Err(e) if e.is_cancelled() => println!("gave up"),
///     Err(e) => eprintln!("failed: {}", e),
/// }
/// ```
pub type TaskResult<T> = Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_predicate() {
        assert!(TaskError::Cancelled.is_cancelled());
        assert!(!TaskError::message("boom").is_cancelled());
    }

    #[test]
    fn adapter_preserves_message() {
        let err = TaskError::message("connection reset");
        assert_eq!(err.to_string(), "async operation failed: connection reset");
    }

    #[test]
    fn clones_share_payload() {
        let err = TaskError::adapter(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "deadline elapsed",
        ));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
