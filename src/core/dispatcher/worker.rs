//! Callback worker threads and completion tracking.

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::core::DispatchError;

/// Invoked on the worker thread when a callback panics, with the callback
/// name and the panic message.
pub type PanicHook = Arc<dyn Fn(&'static str, &str) + Send + Sync>;

/// A queued callback invocation.
pub(super) struct CallbackJob {
    pub(super) seq: u64,
    pub(super) name: &'static str,
    pub(super) run: Box<dyn FnOnce() + Send + 'static>,
}

#[derive(Debug, Default)]
struct Counts {
    next_seq: u64,
    in_flight: BTreeSet<u64>,
    dispatched: u64,
    completed: u64,
    failed: u64,
    rejected: u64,
}

/// Tracks which dispatched invocations have finished.
///
/// Every invocation gets a sequence number. A drain snapshots the next
/// sequence number and waits until no lower number is still in flight, so
/// work dispatched after the drain began never holds it up and work
/// finishing out of order never releases it early.
#[derive(Debug, Default)]
pub(super) struct CompletionTracker {
    counts: Mutex<Counts>,
    settled: Condvar,
}

impl CompletionTracker {
    /// Reserve a sequence number for an invocation about to be enqueued.
    pub(super) fn reserve(&self) -> u64 {
        let mut counts = self.counts.lock();
        let seq = counts.next_seq;
        counts.next_seq += 1;
        counts.in_flight.insert(seq);
        seq
    }

    /// The invocation made it into the queue.
    pub(super) fn enqueued(&self) {
        self.counts.lock().dispatched += 1;
    }

    /// The invocation never made it into the queue.
    pub(super) fn abandon(&self, seq: u64) {
        let mut counts = self.counts.lock();
        counts.in_flight.remove(&seq);
        counts.rejected += 1;
        drop(counts);
        self.settled.notify_all();
    }

    /// The invocation ran, successfully or not.
    pub(super) fn finish(&self, seq: u64, failed: bool) {
        let mut counts = self.counts.lock();
        counts.in_flight.remove(&seq);
        counts.completed += 1;
        if failed {
            counts.failed += 1;
        }
        drop(counts);
        self.settled.notify_all();
    }

    /// Sequence number the next invocation will get.
    pub(super) fn watermark(&self) -> u64 {
        self.counts.lock().next_seq
    }

    /// Invocations below `watermark` still in flight.
    pub(super) fn pending_before(&self, watermark: u64) -> u64 {
        let counts = self.counts.lock();
        counts.in_flight.range(..watermark).count() as u64
    }

    /// Block until every invocation below `watermark` has finished.
    pub(super) fn wait_for(&self, watermark: u64, timeout: Duration) -> Result<(), DispatchError> {
        let deadline = Instant::now() + timeout;
        let mut counts = self.counts.lock();
        loop {
            let pending = counts.in_flight.range(..watermark).count() as u64;
            if pending == 0 {
                return Ok(());
            }
            if self.settled.wait_until(&mut counts, deadline).timed_out() {
                let pending = counts.in_flight.range(..watermark).count() as u64;
                if pending == 0 {
                    return Ok(());
                }
                return Err(DispatchError::DrainTimeout { pending });
            }
        }
    }

    /// `(dispatched, completed, failed, rejected, in_flight)`.
    pub(super) fn totals(&self) -> (u64, u64, u64, u64, u64) {
        let counts = self.counts.lock();
        (
            counts.dispatched,
            counts.completed,
            counts.failed,
            counts.rejected,
            counts.in_flight.len() as u64,
        )
    }
}

/// Spawn one callback worker reading the shared queue and, when the pool has
/// more than one worker, its own lane.
pub(super) fn spawn_worker(
    worker_id: usize,
    stack_size: usize,
    shared: Receiver<CallbackJob>,
    lane: Option<Receiver<CallbackJob>>,
    tracker: Arc<CompletionTracker>,
    panic_hook: Option<PanicHook>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("callback-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id, "Callback worker started");
            let run = |job: CallbackJob| run_job(worker_id, job, &tracker, panic_hook.as_ref());
            match lane {
                None => shared.iter().for_each(run),
                Some(lane) => loop {
                    let (next, other) = select! {
                        recv(lane) -> msg => (msg, &shared),
                        recv(shared) -> msg => (msg, &lane),
                    };
                    match next {
                        Ok(job) => run(job),
                        Err(_) => {
                            // One side closed; finish whatever the other still holds.
                            other.iter().for_each(run);
                            break;
                        }
                    }
                },
            }
            debug!(worker_id, "Callback channel closed, worker exiting");
        })
}

fn run_job(
    worker_id: usize,
    job: CallbackJob,
    tracker: &CompletionTracker,
    panic_hook: Option<&PanicHook>,
) {
    let CallbackJob { seq, name, run } = job;
    let failed = match panic::catch_unwind(AssertUnwindSafe(run)) {
        Ok(()) => false,
        Err(payload) => {
            let message = panic_message(&*payload);
            error!(worker_id, callback = name, panic = %message, "Callback panicked");
            if let Some(hook) = panic_hook {
                let forwarded = panic::catch_unwind(AssertUnwindSafe(|| (**hook)(name, &message)));
                if forwarded.is_err() {
                    error!(worker_id, callback = name, "Panic hook panicked");
                }
            }
            true
        }
    };
    tracker.finish(seq, failed);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
