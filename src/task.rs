//! Direct-style asynchronous primitives over callback APIs.
//!
//! [`begin_async`] starts a body on a pool worker under a merged ambient
//! context and blocks the caller until the body first suspends or finishes.
//! Within a body, [`suspend_async`] turns a callback-driven operation into a
//! direct-style expression: it parks the worker until an adapter delivers a
//! value or a failure, routing cancellation through the ambient
//! [`CancelScope`](crate::CancelScope).
//!
//! Blocking the worker is the acknowledged prototype limitation; the
//! contracts here are deliberately silent on the mechanism, so a
//! green-thread or generator implementation can slot in underneath without
//! changing what body code observes.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::context::{self, AmbientContext};
use crate::error::{TaskError, TaskResult};
use crate::scope::CancelScope;
use crate::suspension::{Fail, FailureClosure, Resume, SuspensionFrame};
use crate::pool;

type ErrorHandler = Box<dyn FnOnce(TaskError) + Send + 'static>;

/// Begins an asynchronous body with an empty context and no error handler.
///
/// Returns once the body first suspends (`Ok(())`) or completes without
/// suspending (the body's own outcome). See [`begin_async_with`] for the
/// full contract.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{begin_async, suspend_async_value};
///
/// begin_async(|| {
///     let greeting: &str = suspend_async_value(|resume| {
///         // An adapter would hand `resume` to a completion callback;
///         // resolving inline works the same way.
///         resume.resume("hello");
///     });
///     assert_eq!(greeting, "hello");
///     Ok(())
/// })
/// .unwrap();
/// ```
pub fn begin_async<F>(body: F) -> TaskResult<()>
where
    F: FnOnce() -> TaskResult<()> + Send + 'static,
{
    begin(AmbientContext::new(), None, body)
}

/// [`begin_async`] with an ambient context for the body.
///
/// The context is merged over the caller's installed context, inner entries
/// shadowing outer ones, and installed for the body and everything it
/// nests.
pub fn begin_async_in<F>(context: AmbientContext, body: F) -> TaskResult<()>
where
    F: FnOnce() -> TaskResult<()> + Send + 'static,
{
    begin(context, None, body)
}

/// Begins an asynchronous body with a context and an error handler.
///
/// Contract:
///
/// - Returns no later than the body's first suspension.
/// - A body error *before* the first suspension invokes `on_error` exactly
///   once and also surfaces from this call.
/// - A body error *after* the first suspension reaches only `on_error`.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{begin_async_with, suspend_async, AmbientContext, CancelScope};
/// use std::sync::mpsc;
///
/// let scope = CancelScope::new();
/// scope.cancel();
/// let (tx, rx) = mpsc::channel();
///
/// begin_async_with(
///     AmbientContext::of(scope),
///     move |error| tx.send(error).unwrap(),
///     || {
///         let _: () = suspend_async(|_resume, fail| {
///             // A real adapter would start work here; this one only
///             // observes that the ambient scope is long gone.
///             fail.fail(ferrous_scope::TaskError::Cancelled);
///         })?;
///         Ok(())
///     },
/// )
/// .unwrap();
///
/// assert!(rx.recv().unwrap().is_cancelled());
/// ```
pub fn begin_async_with<F, H>(context: AmbientContext, on_error: H, body: F) -> TaskResult<()>
where
    F: FnOnce() -> TaskResult<()> + Send + 'static,
    H: FnOnce(TaskError) + Send + 'static,
{
    begin(context, Some(Box::new(on_error)), body)
}

fn begin<F>(context_new: AmbientContext, on_error: Option<ErrorHandler>, body: F) -> TaskResult<()>
where
    F: FnOnce() -> TaskResult<()> + Send + 'static,
{
    let merged = context_new.merged_over(&context::installed());
    let entry = Arc::new(EntrySignal::new());
    let worker_entry = entry.clone();
    pool::spawn(move || {
        let result = catch_unwind(AssertUnwindSafe(|| {
            context::with_installed(merged, || with_entry(&worker_entry, body))
        }));
        match result {
            Ok(outcome) => worker_entry.finish(outcome, on_error),
            Err(_) => {
                // An unwinding body is unrecoverable misuse: the caller may
                // be parked on this signal and suspended frames would leak.
                tracing::error!("asynchronous body panicked; aborting");
                std::process::abort();
            }
        }
    });
    entry.wait_entry()
}

/// Suspends the current asynchronous body until an adapter resolves it.
///
/// `op` receives the [`Resume`] and [`Fail`] handles and starts the
/// underlying work; inside it, code typically discovers the ambient
/// [`CancelScope`](crate::CancelScope) via
/// [`get_context`](crate::get_context) and registers cancellables with it.
/// The frame's failure closure sits on the scope's suspension stack for
/// exactly the lifetime of this call, and the items registered under it are
/// pruned when the call returns, on every exit path.
///
/// Resolution follows the precedence rules: one value, any number of
/// cancellations, at most one real error, real outcomes superseding
/// cancellation in a race.
///
/// # Panics
///
/// Calling this outside a [`begin_async`] body is fatal misuse.
pub fn suspend_async<T, F>(op: F) -> TaskResult<T>
where
    T: Send + 'static,
    F: FnOnce(Resume<T>, Fail),
{
    let entry = current_entry()
        .unwrap_or_else(|| panic!("suspend_async called outside a begin_async body"));
    let scope = context::installed().get::<CancelScope>();

    let frame = SuspensionFrame::new();
    let resume = Resume::for_frame(&frame);
    let fail = Fail::for_frame(&frame);

    let _cleanup = scope.as_ref().map(|scope| {
        let tag = fail.closure();
        scope.push_failure_closure(tag.clone());
        FramePruner { scope: scope.clone(), tag }
    });

    op(resume, fail);
    entry.mark_suspended();
    frame.wait()
}

/// The no-cancel suspension variant.
///
/// Identical handoff, but the operation gets only a [`Resume`] handle and
/// no cancel scope is consulted: the call cannot fail, so it returns `T`
/// directly. Touching a cancel scope from inside `op` is a usage error:
/// with no failure closure on the stack, `add` panics.
///
/// # Panics
///
/// Calling this outside a [`begin_async`] body is fatal misuse.
pub fn suspend_async_value<T, F>(op: F) -> T
where
    T: Send + 'static,
    F: FnOnce(Resume<T>),
{
    let entry = current_entry()
        .unwrap_or_else(|| panic!("suspend_async_value called outside a begin_async body"));
    let frame = SuspensionFrame::new();
    op(Resume::for_frame(&frame));
    entry.mark_suspended();
    match frame.wait() {
        Ok(value) => value,
        // No Fail handle exists for this frame.
        Err(_) => unreachable!("no-cancel suspension cannot fail"),
    }
}

/// Pops the failure closure and prunes the frame's registrations on every
/// exit path out of `suspend_async`.
struct FramePruner {
    scope: Arc<CancelScope>,
    tag: FailureClosure,
}

impl Drop for FramePruner {
    fn drop(&mut self) {
        self.scope.pop_failure_closure(&self.tag);
        self.scope.remove_all(&self.tag);
    }
}

/// Signal through which a body reports "first suspension or completion"
/// back to its blocked `begin_async` caller.
struct EntrySignal {
    state: Mutex<EntryState>,
    changed: Condvar,
}

struct EntryState {
    suspended: bool,
    outcome: Option<TaskResult<()>>,
}

impl EntrySignal {
    fn new() -> Self {
        Self {
            state: Mutex::new(EntryState { suspended: false, outcome: None }),
            changed: Condvar::new(),
        }
    }

    /// Idempotent; only the first suspension unblocks the caller.
    fn mark_suspended(&self) {
        let mut state = self.state.lock();
        if !state.suspended {
            state.suspended = true;
            self.changed.notify_all();
        }
    }

    fn finish(&self, result: TaskResult<()>, on_error: Option<ErrorHandler>) {
        // `suspended` can no longer change: only the body's own worker sets
        // it, and the body has returned.
        let suspended = self.state.lock().suspended;
        if let Err(error) = &result {
            match on_error {
                Some(handler) => handler(error.clone()),
                None if suspended => {
                    tracing::error!(%error, "asynchronous body failed with no error handler")
                }
                // Pre-suspension errors surface from begin_async below.
                None => {}
            }
        }
        if !suspended {
            let mut state = self.state.lock();
            state.outcome = Some(result);
            self.changed.notify_all();
        }
    }

    fn wait_entry(&self) -> TaskResult<()> {
        let mut state = self.state.lock();
        while !state.suspended && state.outcome.is_none() {
            self.changed.wait(&mut state);
        }
        match state.outcome.take() {
            Some(result) => result,
            None => Ok(()),
        }
    }
}

thread_local! {
    static ENTRY: RefCell<Option<Arc<EntrySignal>>> = const { RefCell::new(None) };
}

fn with_entry<R>(entry: &Arc<EntrySignal>, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<Arc<EntrySignal>>);
    impl Drop for Restore {
        fn drop(&mut self) {
            let prior = self.0.take();
            ENTRY.with(|cell| *cell.borrow_mut() = prior);
        }
    }

    let prior = ENTRY.with(|cell| cell.borrow_mut().replace(entry.clone()));
    let _restore = Restore(prior);
    f()
}

fn current_entry() -> Option<Arc<EntrySignal>> {
    ENTRY.with(|cell| cell.borrow().clone())
}
