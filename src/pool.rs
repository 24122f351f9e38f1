//! Shared worker pool backing asynchronous bodies and delayed work.
//!
//! The blocking-handoff prototype parks a worker for every suspended body,
//! so the pool must be able to grow: a submission either reserves an idle
//! worker or spawns a fresh one. Idle workers retire after a keep-alive.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

type Job = Box<dyn FnOnce() + Send + 'static>;

const KEEP_ALIVE: Duration = Duration::from_secs(30);

static POOL: Lazy<WorkerPool> = Lazy::new(WorkerPool::new);

/// Runs `f` on a pool worker.
pub(crate) fn spawn<F: FnOnce() + Send + 'static>(f: F) {
    POOL.execute(Box::new(f));
}

struct PoolShared {
    sender: Mutex<Sender<Job>>,
    receiver: Mutex<Receiver<Job>>,
    /// Workers waiting for a job and not yet reserved by a submission.
    idle: AtomicUsize,
    spawned: AtomicUsize,
}

struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            shared: Arc::new(PoolShared {
                sender: Mutex::new(sender),
                receiver: Mutex::new(receiver),
                idle: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
            }),
        }
    }

    fn execute(&self, job: Job) {
        // Reserve an idle worker, or grow. Reserving before enqueueing is
        // what keeps a fully parked pool from stranding this job.
        let mut idle = self.shared.idle.load(Ordering::Acquire);
        loop {
            if idle == 0 {
                spawn_worker(&self.shared);
                break;
            }
            match self.shared.idle.compare_exchange(
                idle,
                idle - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => idle = current,
            }
        }
        self.shared
            .sender
            .lock()
            .send(job)
            .expect("worker pool receiver dropped");
    }
}

fn spawn_worker(shared: &Arc<PoolShared>) {
    let shared = shared.clone();
    let id = shared.spawned.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(worker = id, "growing worker pool");
    std::thread::Builder::new()
        .name(format!("ferrous-scope-worker-{id}"))
        .spawn(move || worker_loop(shared))
        .expect("failed to spawn pool worker");
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let job = shared.receiver.lock().recv_timeout(KEEP_ALIVE);
        match job {
            Ok(job) => {
                job();
                shared.idle.fetch_add(1, Ordering::AcqRel);
            }
            Err(RecvTimeoutError::Timeout) => {
                // Retire unless a submission reserved this worker between
                // the timeout and now; a failed claim means a job is coming.
                let mut idle = shared.idle.load(Ordering::Acquire);
                let retired = loop {
                    if idle == 0 {
                        break false;
                    }
                    match shared.idle.compare_exchange(
                        idle,
                        idle - 1,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break true,
                        Err(current) => idle = current,
                    }
                };
                if retired {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Barrier, Mutex as StdMutex};

    #[test]
    fn runs_submitted_jobs() {
        let (tx, rx) = mpsc::channel();
        spawn(move || tx.send(41usize + 1).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn grows_past_blocked_workers() {
        const JOBS: usize = 8;
        let barrier = Arc::new(Barrier::new(JOBS + 1));
        let started = Arc::new(AtomicUsize::new(0));
        for _ in 0..JOBS {
            let barrier = barrier.clone();
            let started = started.clone();
            spawn(move || {
                started.fetch_add(1, Ordering::SeqCst);
                barrier.wait();
            });
        }
        // Every job must be running at once for the barrier to release.
        barrier.wait();
        assert_eq!(started.load(Ordering::SeqCst), JOBS);
    }

    #[test]
    fn jobs_run_concurrently_with_submitter() {
        let slot = Arc::new(StdMutex::new(None));
        let (tx, rx) = mpsc::channel();
        {
            let slot = slot.clone();
            spawn(move || {
                *slot.lock().unwrap() = Some("done");
                tx.send(()).unwrap();
            });
        }
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(*slot.lock().unwrap(), Some("done"));
    }
}
