//! Cancel scopes: registries of cancellables with timeouts and subscopes.

use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cancellable::Cancellable;
use crate::context::AnyArc;
use crate::error::TaskError;
use crate::suspension::FailureClosure;

struct ScopeItem {
    cancellable: Arc<dyn Cancellable>,
    concrete: AnyArc,
    type_id: TypeId,
    on_failure: FailureClosure,
}

#[derive(Default)]
struct ScopeState {
    /// Insertion order is the cancellation order.
    items: Vec<ScopeItem>,
    /// Sticky once true; late registrations are cancelled synchronously.
    cancel_called: bool,
    /// One failure closure per active suspension rooted in this scope.
    failure_stack: Vec<FailureClosure>,
}

struct ScopeInner {
    state: Mutex<ScopeState>,
    timer: Mutex<Option<TimerHandle>>,
}

/// A cancellation domain over which [`cancel`](CancelScope::cancel) fans out
/// to every registered [`Cancellable`].
///
/// Scopes are cheap cloneable handles over shared state; clones address the
/// same domain. A scope travels to suspension bodies through the ambient
/// context, where adapters discover it with
/// [`get_context`](crate::get_context) and register the work they start.
///
/// Scopes are themselves [`Cancellable`], which is how
/// [`make_subscope`](CancelScope::make_subscope) nests domains: the child is
/// registered as an item of the parent, so a parent cancel cascades down,
/// while a child cancel never travels up.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{begin_async_in, get_context, suspend_async};
/// use ferrous_scope::{AmbientContext, CancelScope, RequestHandle, TaskError};
/// use std::sync::Arc;
///
/// let scope = CancelScope::new();
/// scope.cancel();
///
/// let result: Result<(), TaskError> = begin_async_in(AmbientContext::of(scope), || {
///     let value: u32 = suspend_async(|_resume, _fail| {
///         let scope = get_context::<CancelScope>().expect("scope travels in context");
///         // Registering against the already-cancelled scope fails the
///         // suspension before the request would even start.
///         scope.add(Arc::new(RequestHandle::new()));
///     })?;
///     unreachable!("the suspension can only fail, value {value} never arrives");
/// });
/// // The body failed after its first suspension, so begin_async itself
/// // still reports a clean handoff.
/// assert!(result.is_ok());
/// ```
pub struct CancelScope {
    inner: Arc<ScopeInner>,
}

impl CancelScope {
    /// Creates a scope with no timeout.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                state: Mutex::new(ScopeState::default()),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Creates a scope whose timer calls [`cancel`](CancelScope::cancel)
    /// after `timeout`. A zero timeout arms nothing.
    pub fn with_timeout(timeout: Duration) -> Self {
        let scope = Self::new();
        scope.set_timeout(timeout);
        scope
    }

    /// Re-arms the timeout relative to now.
    ///
    /// Any prior timer is disarmed first; a zero duration just disarms.
    /// The timer is also disarmed when the last handle to the scope drops.
    pub fn set_timeout(&self, timeout: Duration) {
        let mut slot = self.inner.timer.lock();
        // Dropping the previous handle disarms its sleeper.
        *slot = None;
        if timeout == Duration::ZERO {
            return;
        }
        *slot = Some(TimerHandle::arm(Arc::downgrade(&self.inner), timeout));
    }

    /// Cancels every registered item, in insertion order.
    ///
    /// For each item the paired failure closure fires with
    /// [`TaskError::Cancelled`], then the item's own
    /// [`cancel`](Cancellable::cancel) runs. Both happen outside the scope
    /// lock on a snapshot, so an item's `cancel` may freely register with or
    /// query the scope. Safe to call repeatedly; `cancel_called` is sticky.
    pub fn cancel(&self) {
        let snapshot: Vec<(FailureClosure, Arc<dyn Cancellable>)> = {
            let mut state = self.inner.state.lock();
            state.cancel_called = true;
            state
                .items
                .iter()
                .map(|item| (item.on_failure.clone(), item.cancellable.clone()))
                .collect()
        };
        tracing::trace!(items = snapshot.len(), "cancelling scope");
        for (on_failure, cancellable) in snapshot {
            on_failure(TaskError::Cancelled);
            cancellable.cancel();
        }
    }

    /// True iff every currently registered item reports
    /// [`is_cancelled`](Cancellable::is_cancelled).
    ///
    /// A scope with no registered items satisfies that vacuously.
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .state
            .lock()
            .items
            .iter()
            .all(|item| item.cancellable.is_cancelled())
    }

    /// Registers a cancellable, pairing it with the topmost failure closure.
    ///
    /// Must be called from within an active suspension on this scope; doing
    /// otherwise is a programmer error and panics. If the scope was already
    /// cancelled, the new item's failure closure fires with
    /// [`TaskError::Cancelled`] and the item is cancelled before `add`
    /// returns.
    pub fn add<C: Cancellable>(&self, cancellable: Arc<C>) {
        let (on_failure, already_cancelled) = {
            let mut state = self.inner.state.lock();
            let on_failure = match state.failure_stack.last() {
                Some(closure) => closure.clone(),
                None => panic!("add called with no active suspension on this scope"),
            };
            let already_cancelled = state.cancel_called;
            state.items.push(ScopeItem {
                cancellable: cancellable.clone(),
                concrete: cancellable.clone(),
                type_id: TypeId::of::<C>(),
                on_failure: on_failure.clone(),
            });
            (on_failure, already_cancelled)
        };
        if already_cancelled {
            tracing::trace!("item registered after cancel; cancelling it now");
            on_failure(TaskError::Cancelled);
            cancellable.cancel();
        }
    }

    /// Registered items of concrete type `T`, in insertion order.
    ///
    /// This is the extension hook adapters build on: enumerate every
    /// [`RequestHandle`](crate::RequestHandle) to suspend or resume the
    /// scope's transfers collectively, or every `CancelScope` to walk live
    /// subscopes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ferrous_scope::{begin_async_in, suspend_async, get_context};
    /// use ferrous_scope::{AmbientContext, Cancellable, CancelScope, RequestHandle};
    /// use std::sync::Arc;
    ///
    /// let scope = CancelScope::new();
    /// let outer = scope.clone();
    /// begin_async_in(AmbientContext::of(scope), || {
    ///     let () = suspend_async(|resume, _fail| {
    ///         let scope = get_context::<CancelScope>().unwrap();
    ///         scope.add(Arc::new(RequestHandle::new()));
    ///         scope.add(Arc::new(RequestHandle::new()));
    ///         for request in scope.cancellables::<RequestHandle>() {
    ///             request.suspend();
    ///         }
    ///         resume.resume(());
    ///     })?;
    ///     Ok(())
    /// })
    /// .unwrap();
    /// # let _ = outer;
    /// ```
    pub fn cancellables<T: Cancellable>(&self) -> Vec<Arc<T>> {
        let id = TypeId::of::<T>();
        self.inner
            .state
            .lock()
            .items
            .iter()
            .filter(|item| item.type_id == id)
            .filter_map(|item| item.concrete.clone().downcast::<T>().ok())
            .collect()
    }

    /// Creates a subscope cancelled transitively by this scope.
    ///
    /// The parent's topmost failure closure is pushed onto the child's
    /// stack, so cancellations raised inside the child route to the
    /// parent's awaiter, and the child is registered as a cancellable of
    /// the parent. Cancelling the child never cancels the parent. Requires
    /// an active suspension on the parent; misuse panics.
    pub fn make_subscope(&self) -> CancelScope {
        self.subscope_with(None)
    }

    /// [`make_subscope`](CancelScope::make_subscope) with a timeout on the
    /// child.
    pub fn make_subscope_with_timeout(&self, timeout: Duration) -> CancelScope {
        self.subscope_with(Some(timeout))
    }

    fn subscope_with(&self, timeout: Option<Duration>) -> CancelScope {
        let parent_top = match self.inner.state.lock().failure_stack.last() {
            Some(closure) => closure.clone(),
            None => panic!("make_subscope called with no active suspension on the parent scope"),
        };
        let child = match timeout {
            Some(timeout) => CancelScope::with_timeout(timeout),
            None => CancelScope::new(),
        };
        // Lives for the child's lifetime; child-rooted cancellations reach
        // the parent's awaiter through it.
        child.push_failure_closure(parent_top);
        self.add(Arc::new(child.clone()));
        child
    }

    pub(crate) fn push_failure_closure(&self, closure: FailureClosure) {
        self.inner.state.lock().failure_stack.push(closure);
    }

    /// Removes a frame's closure from the stack by identity, so frames
    /// resolving out of order (suspensions on this scope from parallel
    /// workers) never unhook each other.
    pub(crate) fn pop_failure_closure(&self, tag: &FailureClosure) {
        let mut state = self.inner.state.lock();
        if let Some(pos) = state.failure_stack.iter().rposition(|c| Arc::ptr_eq(c, tag)) {
            state.failure_stack.remove(pos);
        }
    }

    /// Prunes the items a resolved suspension frame registered.
    ///
    /// Items are tagged by their failure closure's identity; survivors
    /// belong to outer frames.
    pub(crate) fn remove_all(&self, tag: &FailureClosure) {
        self.inner
            .state
            .lock()
            .items
            .retain(|item| !Arc::ptr_eq(&item.on_failure, tag));
    }

    #[cfg(test)]
    pub(crate) fn item_count(&self) -> usize {
        self.inner.state.lock().items.len()
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CancelScope {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CancelScope")
            .field("items", &state.items.len())
            .field("cancel_called", &state.cancel_called)
            .field("active_suspensions", &state.failure_stack.len())
            .finish()
    }
}

/// Scopes are cancellables, which is what makes subscope nesting work.
impl Cancellable for CancelScope {
    fn cancel(&self) {
        CancelScope::cancel(self);
    }

    fn is_cancelled(&self) -> bool {
        CancelScope::is_cancelled(self)
    }
}

struct TimerSignal {
    disarmed: Mutex<bool>,
    changed: Condvar,
}

/// Single-shot re-armable timeout sleeper. Dropping the handle disarms it.
struct TimerHandle {
    signal: Arc<TimerSignal>,
}

impl TimerHandle {
    fn arm(scope: Weak<ScopeInner>, timeout: Duration) -> Self {
        let signal = Arc::new(TimerSignal {
            disarmed: Mutex::new(false),
            changed: Condvar::new(),
        });
        let sleeper = signal.clone();
        std::thread::spawn(move || {
            let deadline = Instant::now() + timeout;
            {
                let mut disarmed = sleeper.disarmed.lock();
                while !*disarmed {
                    if sleeper.changed.wait_until(&mut disarmed, deadline).timed_out() {
                        break;
                    }
                }
                if *disarmed {
                    return;
                }
            }
            if let Some(inner) = scope.upgrade() {
                tracing::debug!(?timeout, "scope timeout elapsed");
                CancelScope { inner }.cancel();
            }
        });
        Self { signal }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        *self.signal.disarmed.lock() = true;
        self.signal.changed.notify_all();
    }
}
