//! Parent cancellation fanning out across nested frames.
//!
//! An outer computation starts two nested ones, each under its own
//! subscope with an in-flight request. Cancelling the parent reaches both;
//! cancelling one subscope alone would not touch its sibling.

use ferrous_scope::{begin_async_with, get_context, suspend_async};
use ferrous_scope::{AmbientContext, CancelScope, Cancellable, RequestHandle};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

fn main() {
    let scope = CancelScope::new();
    let (ready_tx, ready_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    begin_async_with(
        AmbientContext::of(scope.clone()),
        move |error| {
            println!("outer computation ended: {error}");
            done_tx.send(()).unwrap();
        },
        move || {
            let _: u32 = suspend_async(move |_resume, _fail| {
                let scope = get_context::<CancelScope>().unwrap();
                for name in ["left", "right"] {
                    let sub = scope.make_subscope();
                    let ready = ready_tx.clone();
                    begin_async_with(
                        AmbientContext::of(sub),
                        move |error| println!("{name} ended: {error}"),
                        move || {
                            let _: u32 = suspend_async(move |_resume, _fail| {
                                let scope = get_context::<CancelScope>().unwrap();
                                let request = Arc::new(RequestHandle::new());
                                println!("{name} request in flight");
                                scope.add(request);
                                ready.send(()).unwrap();
                            })?;
                            Ok(())
                        },
                    )
                    .unwrap();
                }
            })?;
            Ok(())
        },
    )
    .unwrap();

    ready_rx.recv().unwrap();
    ready_rx.recv().unwrap();

    std::thread::sleep(Duration::from_millis(100));
    println!("cancelling the parent scope");
    scope.cancel();
    println!("every subscope cancelled: {}", scope.is_cancelled());

    done_rx.recv().unwrap();
}
