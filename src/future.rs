//! A one-shot future combinator built on the suspension primitives.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::context::AmbientContext;
use crate::error::TaskResult;
use crate::task::begin_async_in;

struct FutureShared<T> {
    state: Mutex<Option<TaskResult<T>>>,
    done: Condvar,
}

/// A value that an asynchronous body is still producing.
///
/// `TaskFuture` shows that combinators need no primitives beyond
/// [`begin_async`](crate::begin_async) and
/// [`suspend_async`](crate::suspend_async): construction begins an inner
/// asynchronous body, the single resolution is cached, and any number of
/// callers read it back.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{suspend_async_value, AmbientContext, TaskFuture};
///
/// let future = TaskFuture::spawn(AmbientContext::new(), || {
///     let doubled: u32 = suspend_async_value(|resume| {
///         std::thread::spawn(move || resume.resume(21 * 2));
///     });
///     Ok(doubled)
/// });
///
/// assert_eq!(future.wait().unwrap(), 42);
/// // Resolved once; later waits read the cache.
/// assert_eq!(future.wait().unwrap(), 42);
/// ```
pub struct TaskFuture<T> {
    shared: Arc<FutureShared<T>>,
}

impl<T: Send + 'static> TaskFuture<T> {
    /// Begins `body` under `context` and captures its eventual outcome.
    ///
    /// Like every `begin_async`, this returns once the body first suspends;
    /// a body that never suspends resolves the future before `spawn`
    /// returns.
    pub fn spawn<F>(context: AmbientContext, body: F) -> Self
    where
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        let shared = Arc::new(FutureShared {
            state: Mutex::new(None),
            done: Condvar::new(),
        });
        let worker = shared.clone();
        // The body's outcome lands in the cache rather than in an error
        // handler, so the inner begin always reports success.
        let begun = begin_async_in(context, move || {
            let result = body();
            let mut state = worker.state.lock();
            if state.is_none() {
                *state = Some(result);
                worker.done.notify_all();
            }
            Ok(())
        });
        debug_assert!(begun.is_ok());
        Self { shared }
    }

    /// Blocks until the future resolves, then returns the cached outcome.
    pub fn wait(&self) -> TaskResult<T>
    where
        T: Clone,
    {
        let mut state = self.shared.state.lock();
        while state.is_none() {
            self.shared.done.wait(&mut state);
        }
        match &*state {
            Some(result) => result.clone(),
            None => unreachable!("future signalled before resolution"),
        }
    }

    /// Non-blocking peek at the cached outcome.
    pub fn try_get(&self) -> Option<TaskResult<T>>
    where
        T: Clone,
    {
        self.shared.state.lock().clone()
    }

    /// Derives a future whose value is `f` applied to this one's.
    pub fn map<U, F>(&self, f: F) -> TaskFuture<U>
    where
        T: Clone,
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let source = self.clone();
        TaskFuture::spawn(AmbientContext::new(), move || source.wait().map(f))
    }
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}
