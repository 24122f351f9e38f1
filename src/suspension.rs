//! Suspension frames and their resumption handles.
//!
//! Each `suspend_async` call owns one frame: a slot for the resumption
//! value, a slot for an error, and a completion signal the suspended worker
//! blocks on. The first delivery, value or error, wakes the worker; later
//! deliveries only adjust the recorded error under the precedence rule
//! (a real error supersedes a recorded cancellation, a real outcome wins a
//! cancellation race).

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{TaskError, TaskResult};

/// Failure closure shape shared with the cancel scope's suspension stack.
///
/// Closure identity (`Arc::ptr_eq`) tags which suspension frame registered
/// an item, which is how resolved frames prune their registrations.
pub(crate) type FailureClosure = Arc<dyn Fn(TaskError) + Send + Sync>;

struct FrameState<T> {
    value: Option<T>,
    error: Option<TaskError>,
    woken: bool,
    consumed: bool,
    /// Whether the consumed outcome was a cancellation. A real outcome that
    /// lost that race arrives late and is dropped, not treated as misuse.
    resolved_cancelled: bool,
}

pub(crate) struct SuspensionFrame<T> {
    state: Mutex<FrameState<T>>,
    done: Condvar,
}

impl<T> SuspensionFrame<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FrameState {
                value: None,
                error: None,
                woken: false,
                consumed: false,
                resolved_cancelled: false,
            }),
            done: Condvar::new(),
        })
    }

    /// Blocks until the first delivery, then resolves the frame.
    ///
    /// The outcome is read at wake-consumption time, not delivery time: a
    /// real value or real error landing between the wake signal and this
    /// read supersedes an earlier cancellation, which is exactly the race
    /// resolution the precedence rule asks for.
    pub(crate) fn wait(&self) -> TaskResult<T> {
        let mut state = self.state.lock();
        while !state.woken {
            self.done.wait(&mut state);
        }
        state.consumed = true;
        match (state.value.take(), state.error.take()) {
            (Some(value), _) => Ok(value),
            (None, Some(error)) => {
                state.resolved_cancelled = error.is_cancelled();
                Err(error)
            }
            (None, None) => unreachable!("suspension frame woken without an outcome"),
        }
    }

    fn deliver_value(&self, value: T) {
        let mut state = self.state.lock();
        if state.consumed {
            // Losing the cancellation race is legal; anything else is a
            // double resolution.
            assert!(
                state.resolved_cancelled,
                "resume called on an already-resolved suspension"
            );
            return;
        }
        assert!(state.value.is_none(), "suspension resumed twice");
        if let Some(error) = &state.error {
            assert!(
                error.is_cancelled(),
                "resume called after a non-cancelled failure"
            );
        }
        state.value = Some(value);
        self.wake(&mut state);
    }

    fn deliver_error(&self, error: TaskError) {
        let mut state = self.state.lock();
        if error.is_cancelled() {
            // Cancellation is idempotent and never displaces a real outcome.
            if state.consumed || state.value.is_some() {
                return;
            }
            if state.error.is_none() {
                state.error = Some(error);
            }
            self.wake(&mut state);
            return;
        }

        if state.consumed {
            assert!(
                state.resolved_cancelled,
                "fail called on an already-resolved suspension"
            );
            return;
        }
        assert!(
            state.value.is_none(),
            "fail called after the suspension resumed"
        );
        if let Some(existing) = &state.error {
            assert!(
                existing.is_cancelled(),
                "suspension failed twice with non-cancelled errors"
            );
        }
        state.error = Some(error);
        self.wake(&mut state);
    }

    /// First signal unblocks the waiter; later deliveries only mutate the
    /// recorded outcome.
    fn wake(&self, state: &mut FrameState<T>) {
        if !state.woken {
            state.woken = true;
            self.done.notify_one();
        }
    }
}

/// Handle through which an adapter delivers a suspension's value.
///
/// Cloneable and deliverable from any worker. Calling it a second time, or
/// after a real (non-cancelled) failure, is fatal misuse.
pub struct Resume<T> {
    frame: Arc<SuspensionFrame<T>>,
}

impl<T> Resume<T> {
    pub(crate) fn for_frame(frame: &Arc<SuspensionFrame<T>>) -> Self {
        Self { frame: frame.clone() }
    }

    /// Delivers the resumption value and wakes the suspended frame.
    pub fn resume(&self, value: T) {
        self.frame.deliver_value(value);
    }
}

impl<T> Clone for Resume<T> {
    fn clone(&self) -> Self {
        Self { frame: self.frame.clone() }
    }
}

/// Handle through which an adapter fails a suspension.
///
/// May be invoked any number of times with [`TaskError::Cancelled`]; at
/// most one non-cancelled error may be delivered, and it supersedes a
/// previously recorded cancellation.
pub struct Fail {
    closure: FailureClosure,
}

impl Fail {
    pub(crate) fn for_frame<T: Send + 'static>(frame: &Arc<SuspensionFrame<T>>) -> Self {
        let frame = frame.clone();
        Self {
            closure: Arc::new(move |error| frame.deliver_error(error)),
        }
    }

    /// Delivers a failure and wakes the suspended frame.
    pub fn fail(&self, error: TaskError) {
        (self.closure)(error);
    }

    /// The shared closure registered on the cancel scope's suspension
    /// stack; its identity tags the frame's registrations.
    pub(crate) fn closure(&self) -> FailureClosure {
        self.closure.clone()
    }
}

impl Clone for Fail {
    fn clone(&self) -> Self {
        Self { closure: self.closure.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn value_resolves_wait() {
        let frame = SuspensionFrame::new();
        let resume = Resume::for_frame(&frame);
        let waiter = {
            let frame = frame.clone();
            thread::spawn(move || frame.wait())
        };
        thread::sleep(Duration::from_millis(20));
        resume.resume(7usize);
        assert_eq!(waiter.join().unwrap().unwrap(), 7);
    }

    #[test]
    fn cancellation_resolves_wait() {
        let frame = SuspensionFrame::<usize>::new();
        let fail = Fail::for_frame(&frame);
        fail.fail(TaskError::Cancelled);
        assert!(frame.wait().unwrap_err().is_cancelled());
    }

    #[test]
    fn cancellation_is_idempotent() {
        let frame = SuspensionFrame::<usize>::new();
        let fail = Fail::for_frame(&frame);
        fail.fail(TaskError::Cancelled);
        fail.fail(TaskError::Cancelled);
        fail.fail(TaskError::Cancelled);
        assert!(frame.wait().unwrap_err().is_cancelled());
    }

    #[test]
    fn real_error_supersedes_cancellation() {
        let frame = SuspensionFrame::<usize>::new();
        let fail = Fail::for_frame(&frame);
        fail.fail(TaskError::Cancelled);
        fail.fail(TaskError::message("socket closed"));
        let err = frame.wait().unwrap_err();
        assert!(!err.is_cancelled());
    }

    #[test]
    fn value_wins_cancellation_race() {
        let frame = SuspensionFrame::new();
        let fail = Fail::for_frame(&frame);
        let resume = Resume::for_frame(&frame);
        fail.fail(TaskError::Cancelled);
        resume.resume(42usize);
        assert_eq!(frame.wait().unwrap(), 42);
    }

    #[test]
    fn late_cancellation_after_value_is_ignored() {
        let frame = SuspensionFrame::new();
        let resume = Resume::for_frame(&frame);
        let fail = Fail::for_frame(&frame);
        resume.resume(1usize);
        fail.fail(TaskError::Cancelled);
        assert_eq!(frame.wait().unwrap(), 1);
    }

    #[test]
    fn late_outcome_after_consumed_cancellation_is_dropped() {
        let frame = SuspensionFrame::<usize>::new();
        let fail = Fail::for_frame(&frame);
        let resume = Resume::for_frame(&frame);
        fail.fail(TaskError::Cancelled);
        assert!(frame.wait().unwrap_err().is_cancelled());
        // The real outcome lost the race; delivering it now is legal.
        resume.resume(13);
        fail.fail(TaskError::message("too late"));
    }

    #[test]
    #[should_panic(expected = "resumed twice")]
    fn double_resume_is_fatal() {
        let frame = SuspensionFrame::new();
        let resume = Resume::for_frame(&frame);
        resume.resume(1usize);
        resume.resume(2usize);
    }

    #[test]
    #[should_panic(expected = "non-cancelled")]
    fn resume_after_real_failure_is_fatal() {
        let frame = SuspensionFrame::new();
        let fail = Fail::for_frame(&frame);
        let resume = Resume::for_frame(&frame);
        fail.fail(TaskError::message("it broke"));
        resume.resume(1usize);
    }

    #[test]
    #[should_panic(expected = "failed twice")]
    fn two_real_errors_are_fatal() {
        let frame = SuspensionFrame::<usize>::new();
        let fail = Fail::for_frame(&frame);
        fail.fail(TaskError::message("first"));
        fail.fail(TaskError::message("second"));
    }
}
