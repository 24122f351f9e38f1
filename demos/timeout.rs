//! A scope timeout racing a slow work item.
//!
//! The item needs 500ms; the scope allows 150ms. The timeout cancels the
//! scope, the suspension fails with a cancellation, and the delayed item is
//! cancelled before it ever runs.

use ferrous_scope::{begin_async_with, get_context, suspend_async};
use ferrous_scope::{AmbientContext, CancelScope, WorkQueue};
use std::sync::mpsc;
use std::time::{Duration, Instant};

fn main() {
    let scope = CancelScope::with_timeout(Duration::from_millis(150));
    let context = AmbientContext::of(scope).with(WorkQueue::new());
    let (done_tx, done_rx) = mpsc::channel();
    let started = Instant::now();

    begin_async_with(
        context,
        move |error| {
            println!("errored after {:?}: {error}", started.elapsed());
            done_tx.send(()).unwrap();
        },
        || {
            println!("requesting a slow answer...");
            let answer: u32 = suspend_async(|resume, _fail| {
                let queue = get_context::<WorkQueue>().unwrap();
                let scope = get_context::<CancelScope>().unwrap();
                let item = queue.schedule_after(Duration::from_millis(500), move || {
                    resume.resume(42);
                });
                scope.add(item);
            })?;
            println!("got {answer} (this line should never print)");
            Ok(())
        },
    )
    .unwrap();

    done_rx.recv().unwrap();
}
