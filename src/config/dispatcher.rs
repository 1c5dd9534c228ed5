//! Callback dispatcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sizing and timeouts for the callback worker pool.
///
/// A single worker (the default) delivers callbacks in dispatch order. With
/// more workers only callbacks dispatched under the same key keep their
/// order; each worker lane and the shared queue hold `queue_depth` entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Bounded queue length between dispatchers and workers.
    pub queue_depth: usize,
    /// Default `drain` deadline in milliseconds.
    pub drain_timeout_ms: u64,
    /// How long `dispatch` waits for queue space before giving up.
    pub enqueue_timeout_ms: u64,
    /// How long a blocking `call` waits for its result.
    pub call_timeout_ms: u64,
    /// Worker thread stack size in bytes.
    pub thread_stack_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_depth: 1024,
            drain_timeout_ms: 5_000,
            enqueue_timeout_ms: 1_000,
            call_timeout_ms: 5_000,
            thread_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl DispatcherConfig {
    /// Default configuration: one worker, in-order delivery.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One worker per CPU. Unkeyed callbacks may then run out of dispatch
    /// order.
    #[must_use]
    pub fn parallel() -> Self {
        Self::default().with_workers(num_cpus::get())
    }

    /// Set the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the queue depth.
    #[must_use]
    pub const fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set the default drain deadline.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the enqueue timeout.
    #[must_use]
    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the blocking-call timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = duration_ms(timeout);
        self
    }

    /// Default drain deadline.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Enqueue timeout.
    #[must_use]
    pub const fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    /// Blocking-call timeout.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Validate dispatcher configuration values.
    ///
    /// # Errors
    ///
    /// A message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".into());
        }
        if self.queue_depth == 0 {
            return Err("queue_depth must be greater than 0".into());
        }
        if self.drain_timeout_ms == 0 {
            return Err("drain_timeout_ms must be greater than 0".into());
        }
        if self.call_timeout_ms == 0 {
            return Err("call_timeout_ms must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
