#![no_main]

use ferrous_scope::{
    begin_async_in, get_context, suspend_async, AmbientContext, CancelScope, Cancellable,
};
use libfuzzer_sys::fuzz_target;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

#[derive(Default)]
struct Probe {
    cancels: AtomicUsize,
}

impl Cancellable for Probe {
    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancels.load(Ordering::SeqCst) > 0
    }
}

fuzz_target!(|ops: Vec<bool>| {
    if ops.is_empty() || ops.len() > 24 {
        return;
    }

    let scope = CancelScope::new();
    let (probes_tx, probes_rx) = mpsc::channel();
    let body_ops = ops.clone();

    begin_async_in(AmbientContext::of(scope), move || {
        let _ = suspend_async::<u8, _>(move |resume, _fail| {
            let scope = get_context::<CancelScope>().unwrap();
            let mut probes = Vec::new();
            for is_add in &body_ops {
                if *is_add {
                    let probe = Arc::new(Probe::default());
                    scope.add(probe.clone());
                    probes.push(probe);
                } else {
                    scope.cancel();
                }
            }
            probes_tx.send(probes).unwrap();
            resume.resume(0);
        });
        Ok(())
    })
    .unwrap();

    let probes = probes_rx.recv().unwrap();

    let mut expected: Vec<usize> = Vec::new();
    let mut cancelled = false;
    for is_add in &ops {
        if *is_add {
            expected.push(usize::from(cancelled));
        } else {
            for count in &mut expected {
                *count += 1;
            }
            cancelled = true;
        }
    }

    for (probe, expected) in probes.iter().zip(expected) {
        assert_eq!(probe.cancels.load(Ordering::SeqCst), expected);
    }
});
