//! Delayed work items scheduled on pool workers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cancellable::Cancellable;
use crate::context::CoroutineState;
use crate::pool;

/// Scheduler for delayed work items.
///
/// Suspension bodies discover the queue through the ambient context
/// ([`get_context::<WorkQueue>()`](crate::get_context)) and schedule the
/// callbacks that will later resolve their frames. Scheduled closures run
/// under the scheduling frame's saved ambient state, so `get_context`
/// keeps answering inside them even though they execute on another worker.
///
/// # Examples
///
/// ```rust
/// use ferrous_scope::{begin_async_in, get_context, suspend_async};
/// use ferrous_scope::{AmbientContext, CancelScope, WorkQueue};
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// let context = AmbientContext::of(CancelScope::new()).with(WorkQueue::new());
/// let (tx, rx) = mpsc::channel();
///
/// begin_async_in(context, move || {
///     let answer: u32 = suspend_async(|resume, _fail| {
///         let queue = get_context::<WorkQueue>().unwrap();
///         let scope = get_context::<CancelScope>().unwrap();
///         let item = queue.schedule_after(Duration::from_millis(10), move || {
///             resume.resume(42);
///         });
///         scope.add(item);
///     })?;
///     tx.send(answer).unwrap();
///     Ok(())
/// })
/// .unwrap();
///
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
#[derive(Clone, Debug, Default)]
pub struct WorkQueue {
    _private: (),
}

impl WorkQueue {
    /// Creates a work queue handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` on a pool worker once `delay` has elapsed.
    ///
    /// The returned item is [`Cancellable`]: cancelling it before the
    /// deadline keeps `f` from ever running; cancelling it afterwards is a
    /// no-op.
    pub fn schedule_after<F>(&self, delay: Duration, f: F) -> Arc<DelayedTask>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Arc::new(DelayedTask::new());
        let deadline = Instant::now() + delay;
        let state = CoroutineState::save();
        let worker_task = task.clone();
        pool::spawn(move || {
            if !worker_task.await_deadline(deadline) {
                tracing::trace!("delayed item cancelled before its deadline");
                return;
            }
            state.restore(f);
            worker_task.complete();
        });
        task
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DelayedState {
    Scheduled,
    Cancelled,
    Running,
    Completed,
}

/// A scheduled, not-yet-run closure; the work-queue's cancellable.
#[derive(Debug)]
pub struct DelayedTask {
    state: Mutex<DelayedState>,
    changed: Condvar,
}

impl DelayedTask {
    fn new() -> Self {
        Self {
            state: Mutex::new(DelayedState::Scheduled),
            changed: Condvar::new(),
        }
    }

    /// Sleeps until the deadline, waking early on cancellation. Returns
    /// whether the closure should run.
    fn await_deadline(&self, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        loop {
            match *state {
                DelayedState::Cancelled => return false,
                DelayedState::Scheduled => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        if *state == DelayedState::Cancelled {
                            return false;
                        }
                        *state = DelayedState::Running;
                        return true;
                    }
                }
                DelayedState::Running | DelayedState::Completed => return false,
            }
        }
    }

    fn complete(&self) {
        let mut state = self.state.lock();
        if *state == DelayedState::Running {
            *state = DelayedState::Completed;
        }
    }

    /// Whether the item already ran to completion.
    pub fn is_completed(&self) -> bool {
        *self.state.lock() == DelayedState::Completed
    }
}

impl Cancellable for DelayedTask {
    /// Effective only before the closure starts; sticky afterwards.
    fn cancel(&self) {
        let mut state = self.state.lock();
        if *state == DelayedState::Scheduled {
            *state = DelayedState::Cancelled;
            self.changed.notify_all();
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.state.lock() == DelayedState::Cancelled
    }
}
