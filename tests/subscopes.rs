/// Subscope hierarchy tests: transitive cancellation and child timers.

use ferrous_scope::{
    begin_async_with, get_context, suspend_async, AmbientContext, CancelScope, Cancellable,
    RequestHandle,
};
use serial_test::serial;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn recv<T>(rx: &mpsc::Receiver<T>) -> T {
    rx.recv_timeout(Duration::from_secs(5)).expect("test timed out")
}

#[test]
fn parent_cancel_cascades_transitively() {
    let root = CancelScope::new();
    let requests: Vec<Arc<RequestHandle>> =
        (0..3).map(|_| Arc::new(RequestHandle::new())).collect();
    let (ready_tx, ready_rx) = mpsc::channel();

    let r0 = requests[0].clone();
    let r1 = requests[1].clone();
    let r2 = requests[2].clone();
    let ready0 = ready_tx.clone();
    let ready1 = ready_tx.clone();
    let ready2 = ready_tx;

    begin_async_with(
        AmbientContext::of(root.clone()),
        |error| assert!(error.is_cancelled()),
        move || {
            let _: u32 = suspend_async(move |_resume, _fail| {
                let scope = get_context::<CancelScope>().unwrap();
                scope.add(r0);
                ready0.send(()).unwrap();

                let child = scope.make_subscope();
                begin_async_with(
                    AmbientContext::of(child),
                    |error| assert!(error.is_cancelled()),
                    move || {
                        let _: u32 = suspend_async(move |_resume, _fail| {
                            let scope = get_context::<CancelScope>().unwrap();
                            scope.add(r1);
                            ready1.send(()).unwrap();

                            let grandchild = scope.make_subscope();
                            begin_async_with(
                                AmbientContext::of(grandchild),
                                |error| assert!(error.is_cancelled()),
                                move || {
                                    let _: u32 = suspend_async(move |_resume, _fail| {
                                        let scope = get_context::<CancelScope>().unwrap();
                                        scope.add(r2);
                                        ready2.send(()).unwrap();
                                    })?;
                                    Ok(())
                                },
                            )
                            .unwrap();
                        })?;
                        Ok(())
                    },
                )
                .unwrap();
            })?;
            Ok(())
        },
    )
    .unwrap();

    for _ in 0..3 {
        recv(&ready_rx);
    }

    // One cancel at the root walks the whole tree synchronously.
    root.cancel();
    for request in &requests {
        assert!(request.is_cancelled());
    }
}

#[test]
fn sibling_subscopes_are_independent() {
    let root = CancelScope::new();
    let left_request = Arc::new(RequestHandle::new());
    let right_request = Arc::new(RequestHandle::new());
    let registered_left = left_request.clone();
    let registered_right = right_request.clone();
    let (subs_tx, subs_rx) = mpsc::channel::<(CancelScope, CancelScope)>();
    let (ready_tx, ready_rx) = mpsc::channel();

    begin_async_with(
        AmbientContext::of(root.clone()),
        |error| assert!(error.is_cancelled()),
        move || {
            let _: u32 = suspend_async(move |_resume, _fail| {
                let scope = get_context::<CancelScope>().unwrap();
                let left = scope.make_subscope();
                let right = scope.make_subscope();
                subs_tx.send((left.clone(), right.clone())).unwrap();

                for (sub, request, ready) in [
                    (left, registered_left, ready_tx.clone()),
                    (right, registered_right, ready_tx.clone()),
                ] {
                    begin_async_with(
                        AmbientContext::of(sub),
                        |error| assert!(error.is_cancelled()),
                        move || {
                            let _: u32 = suspend_async(move |_resume, _fail| {
                                let scope = get_context::<CancelScope>().unwrap();
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

    recv(&ready_rx);
    recv(&ready_rx);
    let (left, _right) = recv(&subs_rx);

    left.cancel();
    assert!(left_request.is_cancelled());
    assert!(!right_request.is_cancelled());

    root.cancel();
    assert!(right_request.is_cancelled());
}

#[test]
#[serial]
fn timeout_fires_no_earlier_than_its_duration() {
    let scope = CancelScope::with_timeout(Duration::from_millis(120));
    let request = Arc::new(RequestHandle::new());
    let registered = request.clone();
    let (err_tx, err_rx) = mpsc::channel();
    let armed = Instant::now();

    begin_async_with(
        AmbientContext::of(scope),
        move |error| err_tx.send(error).unwrap(),
        move || {
            let _: u32 = suspend_async(move |_resume, _fail| {
                let scope = get_context::<CancelScope>().unwrap();
                scope.add(registered);
            })?;
            Ok(())
        },
    )
    .unwrap();

    let error = recv(&err_rx);
    assert!(error.is_cancelled());
    assert!(armed.elapsed() >= Duration::from_millis(120));
    assert!(request.is_cancelled());
}

#[test]
#[serial]
fn subscope_timeout_cancels_only_the_child() {
    let root = CancelScope::new();
    let parent_request = Arc::new(RequestHandle::new());
    let child_request = Arc::new(RequestHandle::new());
    let registered_parent = parent_request.clone();
    let registered_child = child_request.clone();
    let (child_err_tx, child_err_rx) = mpsc::channel();

    begin_async_with(
        AmbientContext::of(root.clone()),
        |error| assert!(error.is_cancelled()),
        move || {
            let _: u32 = suspend_async(move |_resume, _fail| {
                let scope = get_context::<CancelScope>().unwrap();
                scope.add(registered_parent);

                let sub = scope.make_subscope_with_timeout(Duration::from_millis(60));
                begin_async_with(
                    AmbientContext::of(sub),
                    move |error| child_err_tx.send(error).unwrap(),
                    move || {
                        let _: u32 = suspend_async(move |_resume, _fail| {
                            let scope = get_context::<CancelScope>().unwrap();
                            scope.add(registered_child);
                        })?;
                        Ok(())
                    },
                )
                .unwrap();
            })?;
            Ok(())
        },
    )
    .unwrap();

    assert!(recv(&child_err_rx).is_cancelled());
    assert!(child_request.is_cancelled());
    assert!(!parent_request.is_cancelled());

    root.cancel();
    assert!(parent_request.is_cancelled());
}
