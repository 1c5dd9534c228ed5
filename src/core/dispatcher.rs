//! Asynchronous callback dispatch on dedicated OS threads.
//!
//! Callers enqueue closures onto a bounded channel; a fixed set of worker
//! threads runs them. A panicking callback is caught, counted as failed and
//! reported through the panic hook; the worker keeps running.
//!
//! With more than one worker, each worker also owns a bounded lane. Keyed
//! callbacks go to the lane picked by hashing the key, so callbacks sharing
//! a key run one after another in dispatch order.
//!
//! # Design Principles
//!
//! - **Backpressure**: a full queue blocks the caller up to the enqueue
//!   timeout, then reports `QueueFull`
//! - **No polling**: drains wait on a Condvar signalled by workers
//! - **Clean shutdown**: dropping the senders unblocks workers naturally

mod worker;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DispatcherConfig;
use crate::core::DispatchError;

use worker::{spawn_worker, CallbackJob, CompletionTracker};
pub use worker::PanicHook;

/// Dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Worker threads.
    pub workers: usize,
    /// Invocations accepted into the queue.
    pub dispatched: u64,
    /// Invocations that ran, including failed ones.
    pub completed: u64,
    /// Invocations that panicked.
    pub failed: u64,
    /// Invocations refused because the queue was full or closed.
    pub rejected: u64,
    /// Invocations queued or running.
    pub in_flight: u64,
}

/// Sending halves of the shared queue and the per-worker lanes.
struct Queues {
    shared: Sender<CallbackJob>,
    lanes: Vec<Sender<CallbackJob>>,
}

impl Queues {
    fn pick(&self, key: Option<u64>) -> Sender<CallbackJob> {
        match key {
            Some(hash) if !self.lanes.is_empty() => {
                let lane = (hash % self.lanes.len() as u64) as usize;
                self.lanes[lane].clone()
            }
            _ => self.shared.clone(),
        }
    }
}

/// Runs callbacks on worker threads and lets callers wait for them.
pub struct CallbackDispatcher {
    config: DispatcherConfig,
    job_tx: Mutex<Option<Queues>>,
    tracker: Arc<CompletionTracker>,
    shutdown: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl CallbackDispatcher {
    /// Create a dispatcher and spawn its workers.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a bad configuration, `Internal` if a worker thread
    /// cannot be spawned.
    pub fn new(config: DispatcherConfig) -> Result<Self, DispatchError> {
        Self::with_panic_hook(config, None)
    }

    /// Create a dispatcher whose workers report callback panics to `hook`.
    ///
    /// # Errors
    ///
    /// Same as [`CallbackDispatcher::new`].
    pub fn with_panic_hook(
        config: DispatcherConfig,
        hook: Option<PanicHook>,
    ) -> Result<Self, DispatchError> {
        config.validate().map_err(DispatchError::InvalidConfig)?;

        let (job_tx, job_rx) = bounded::<CallbackJob>(config.queue_depth);
        let tracker = Arc::new(CompletionTracker::default());

        // A single worker already runs everything in order.
        let mut lanes = Vec::new();
        let mut lane_rxs = Vec::new();
        if config.workers > 1 {
            for _ in 0..config.workers {
                let (lane_tx, lane_rx) = bounded::<CallbackJob>(config.queue_depth);
                lanes.push(lane_tx);
                lane_rxs.push(lane_rx);
            }
        }
        let mut lane_rxs = lane_rxs.into_iter();

        let mut workers = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let handle = spawn_worker(
                worker_id,
                config.thread_stack_size,
                job_rx.clone(),
                lane_rxs.next(),
                Arc::clone(&tracker),
                hook.clone(),
            )
            .map_err(|e| DispatchError::Internal(format!("failed to spawn callback worker: {e}")))?;
            workers.push(handle);
        }

        info!(
            workers = config.workers,
            queue_depth = config.queue_depth,
            "Callback dispatcher started"
        );

        Ok(Self {
            config,
            job_tx: Mutex::new(Some(Queues {
                shared: job_tx,
                lanes,
            })),
            tracker,
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(workers),
        })
    }

    /// Enqueue `f` to run on a worker thread and return immediately.
    ///
    /// Waits up to the enqueue timeout for queue space.
    ///
    /// # Errors
    ///
    /// `QueueFull` when no space freed up in time, `Shutdown` after
    /// [`CallbackDispatcher::shutdown`].
    pub fn dispatch<F>(&self, name: &'static str, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(None, name, Box::new(f), true)
    }

    /// Like [`CallbackDispatcher::dispatch`], but callbacks with equal keys
    /// run one at a time in the order they were dispatched.
    ///
    /// # Errors
    ///
    /// Same as [`CallbackDispatcher::dispatch`].
    pub fn dispatch_keyed<K, F>(&self, key: &K, name: &'static str, f: F) -> Result<(), DispatchError>
    where
        K: Hash + ?Sized,
        F: FnOnce() + Send + 'static,
    {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        self.enqueue(Some(hasher.finish()), name, Box::new(f), true)
    }

    /// Enqueue `f` only if there is queue space right now.
    ///
    /// # Errors
    ///
    /// `QueueFull` when the queue is full, `Shutdown` after
    /// [`CallbackDispatcher::shutdown`].
    pub fn try_dispatch<F>(&self, name: &'static str, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(None, name, Box::new(f), false)
    }

    fn enqueue(
        &self,
        key: Option<u64>,
        name: &'static str,
        run: Box<dyn FnOnce() + Send + 'static>,
        wait: bool,
    ) -> Result<(), DispatchError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(DispatchError::Shutdown);
        }
        let sender = self
            .job_tx
            .lock()
            .as_ref()
            .map(|queues| queues.pick(key))
            .ok_or(DispatchError::Shutdown)?;

        let seq = self.tracker.reserve();
        let job = CallbackJob { seq, name, run };
        let sent = if wait {
            sender
                .send_timeout(job, self.config.enqueue_timeout())
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => DispatchError::QueueFull,
                    SendTimeoutError::Disconnected(_) => DispatchError::Shutdown,
                })
        } else {
            sender.try_send(job).map_err(|e| match e {
                TrySendError::Full(_) => DispatchError::QueueFull,
                TrySendError::Disconnected(_) => DispatchError::Shutdown,
            })
        };
        match sent {
            Ok(()) => {
                self.tracker.enqueued();
                Ok(())
            }
            Err(e) => {
                self.tracker.abandon(seq);
                if e == DispatchError::QueueFull {
                    warn!(callback = name, "Callback queue full, invocation rejected");
                }
                Err(e)
            }
        }
    }

    /// Run `f` on a worker thread and wait for its result.
    ///
    /// # Errors
    ///
    /// Dispatch errors, `Timeout` when the call timeout elapses, and
    /// `CallbackPanicked` when `f` panics.
    pub fn call<R, F>(&self, name: &'static str, f: F) -> Result<R, DispatchError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = bounded::<R>(1);
        self.dispatch(name, move || {
            let _ = reply_tx.send(f());
        })?;
        match reply_rx.recv_timeout(self.config.call_timeout()) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(DispatchError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(DispatchError::CallbackPanicked(name.to_string())),
        }
    }

    /// Wait, up to the configured drain timeout, for every invocation
    /// dispatched before this call to finish.
    ///
    /// Calling this from inside a callback waits on itself and times out.
    ///
    /// # Errors
    ///
    /// `DrainTimeout` with the number still pending.
    pub fn drain(&self) -> Result<(), DispatchError> {
        self.drain_timeout(self.config.drain_timeout())
    }

    /// [`CallbackDispatcher::drain`] with an explicit deadline.
    ///
    /// # Errors
    ///
    /// `DrainTimeout` with the number still pending.
    pub fn drain_timeout(&self, timeout: Duration) -> Result<(), DispatchError> {
        let watermark = self.tracker.watermark();
        let result = self.tracker.wait_for(watermark, timeout);
        if let Err(DispatchError::DrainTimeout { pending }) = &result {
            warn!(pending, "Callback drain timed out");
        }
        result
    }

    /// Async variant of [`CallbackDispatcher::drain_timeout`].
    ///
    /// # Errors
    ///
    /// `DrainTimeout` with the number still pending, `Internal` if the
    /// blocking wait could not be joined.
    #[cfg(feature = "tokio-runtime")]
    pub async fn drain_async(&self, timeout: Duration) -> Result<(), DispatchError> {
        let tracker = Arc::clone(&self.tracker);
        let watermark = tracker.watermark();
        let waiter = tokio::task::spawn_blocking(move || tracker.wait_for(watermark, timeout));
        match tokio::time::timeout(timeout + Duration::from_millis(50), waiter).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(DispatchError::Internal(format!("drain task failed: {join_err}"))),
            Err(_) => Err(DispatchError::DrainTimeout {
                pending: self.tracker.pending_before(watermark),
            }),
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        let (dispatched, completed, failed, rejected, in_flight) = self.tracker.totals();
        DispatcherStats {
            workers: self.config.workers,
            dispatched,
            completed,
            failed,
            rejected,
            in_flight,
        }
    }

    /// True once [`CallbackDispatcher::shutdown`] has run.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting work, let queued callbacks finish, and join the
    /// workers.
    ///
    /// Each worker gets two seconds to exit before it is detached. A worker
    /// calling this on its own dispatcher is never joined.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down callback dispatcher");

        // Dropping the senders lets workers finish the queues and exit recv().
        self.job_tx.lock().take();

        let current = thread::current().id();
        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            if worker.thread().id() == current {
                debug!(worker_id = idx, "Shutdown called from a callback, not joining self");
                continue;
            }
            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let joined = worker.join();
                let _ = tx.send(joined.is_ok());
            });
            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(true) => {
                    debug!(worker_id = idx, "Callback worker joined");
                    let _ = join_thread.join();
                }
                Ok(false) => {
                    warn!(worker_id = idx, "Callback worker panicked");
                    let _ = join_thread.join();
                }
                Err(_) => {
                    warn!(worker_id = idx, "Callback worker did not exit within timeout, detaching");
                }
            }
        }

        info!(worker_count, "Callback dispatcher shut down");
    }
}

impl Drop for CallbackDispatcher {
    fn drop(&mut self) {
        // Signal only. Joining here could hang when dropped mid-callback.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.job_tx.lock().take();
        }
    }
}
