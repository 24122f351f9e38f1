//! The cancellable capability and the reference request adapter.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Capability implemented by anything a [`CancelScope`](crate::CancelScope)
/// can cancel.
///
/// Implementers range from HTTP request handles to delayed work items to
/// cancel scopes themselves (scopes are cancellables, which is what makes
/// subscope nesting work).
///
/// # Contract
///
/// - [`cancel`](Cancellable::cancel) requests cessation of the underlying
///   work. It must be safe to call from any thread and more than once.
/// - [`is_cancelled`](Cancellable::is_cancelled) reflects observable state,
///   not merely whether `cancel` was called; an adapter maps its own
///   terminal cancel state onto it.
/// - [`suspend`](Cancellable::suspend) / [`resume`](Cancellable::resume)
///   default to no-ops; adapters whose transports support pausing (HTTP
///   tasks) override them.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::Cancellable;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct Download {
///     stopped: AtomicBool,
/// }
///
/// impl Cancellable for Download {
///     fn cancel(&self) {
///         self.stopped.store(true, Ordering::Release);
///     }
///
///     fn is_cancelled(&self) -> bool {
///         self.stopped.load(Ordering::Acquire)
///     }
/// }
/// ```
pub trait Cancellable: Send + Sync + 'static {
    /// Requests cessation of the underlying work. Idempotent.
    fn cancel(&self);

    /// Whether the underlying work observably reached a cancelled state.
    fn is_cancelled(&self) -> bool;

    /// Pauses the underlying work, when the transport supports it.
    fn suspend(&self) {}

    /// Resumes previously suspended work, when the transport supports it.
    fn resume(&self) {}
}

/// Lifecycle of a [`RequestHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// The transfer is in flight.
    Running,
    /// The transfer is paused via [`Cancellable::suspend`].
    Suspended,
    /// Cancellation was requested and the transport is winding down.
    Cancelling,
    /// The transfer reached a terminal state (success, failure, or cancel).
    Completed,
}

/// Reference cancellable for request-shaped work.
///
/// HTTP adapters wrap their client's native task handle the way this type
/// does: `cancel` moves the request into `Cancelling`, and `is_cancelled`
/// reports true while winding down *or* once the transport has surfaced its
/// own cancellation error. Suspend/resume map onto transport pause/resume.
///
/// The crate's tests use `RequestHandle` as the stand-in transport; real
/// adapters keep the same state mapping around their client of choice.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{Cancellable, RequestHandle, RequestState};
///
/// let request = RequestHandle::new();
/// assert_eq!(request.state(), RequestState::Running);
///
/// request.cancel();
/// assert!(request.is_cancelled());
///
/// // The transport later reports its native cancellation error.
/// request.complete_cancelled();
/// assert_eq!(request.state(), RequestState::Completed);
/// assert!(request.is_cancelled());
/// ```
#[derive(Debug)]
pub struct RequestHandle {
    state: Mutex<RequestState>,
    transport_cancelled: AtomicBool,
}

impl RequestHandle {
    /// Creates a handle for an in-flight request.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RequestState::Running),
            transport_cancelled: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RequestState {
        *self.state.lock()
    }

    /// Marks the transfer terminal after a success or a real failure.
    pub fn complete(&self) {
        *self.state.lock() = RequestState::Completed;
    }

    /// Marks the transfer terminal after the transport surfaced its native
    /// cancellation error. The handle keeps reporting
    /// [`is_cancelled`](Cancellable::is_cancelled) afterwards.
    pub fn complete_cancelled(&self) {
        self.transport_cancelled.store(true, Ordering::Release);
        *self.state.lock() = RequestState::Completed;
    }
}

impl Default for RequestHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellable for RequestHandle {
    fn cancel(&self) {
        let mut state = self.state.lock();
        if *state != RequestState::Completed {
            *state = RequestState::Cancelling;
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.state.lock() == RequestState::Cancelling
            || self.transport_cancelled.load(Ordering::Acquire)
    }

    fn suspend(&self) {
        let mut state = self.state.lock();
        if *state == RequestState::Running {
            *state = RequestState::Suspended;
        }
    }

    fn resume(&self) {
        let mut state = self.state.lock();
        if *state == RequestState::Suspended {
            *state = RequestState::Running;
        }
    }
}
