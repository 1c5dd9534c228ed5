//! Inbound cluster events and the thread that applies them.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, SendError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::ledger::AllocatedContainer;
use crate::core::scheduler::TaskScheduler;
use crate::core::SchedulerError;
use crate::util::clock::now_ms;
use crate::util::serde::{ContainerStatus, NodeReport};

/// A notification from the resource-manager protocol client.
#[derive(Debug)]
pub enum RmEvent {
    /// Containers were granted.
    ContainersAllocated(Vec<AllocatedContainer>),
    /// Containers finished.
    ContainersCompleted(Vec<ContainerStatus>),
    /// Node membership or health changed.
    NodesUpdated(Vec<NodeReport>),
    /// The cluster asked the application to shut down.
    ShutdownRequested,
    /// The client hit an asynchronous error.
    Error(anyhow::Error),
}

/// Receiver of protocol-client callbacks.
pub trait RmCallbackHandler: Send + Sync {
    /// Containers were granted.
    fn on_containers_allocated(&self, containers: Vec<AllocatedContainer>);
    /// Containers finished.
    fn on_containers_completed(&self, statuses: Vec<ContainerStatus>);
    /// Node membership or health changed.
    fn on_nodes_updated(&self, nodes: Vec<NodeReport>);
    /// The cluster asked the application to shut down.
    fn on_shutdown_request(&self);
    /// The client hit an asynchronous error.
    fn on_error(&self, cause: anyhow::Error);
    /// Application progress reported on the next heartbeat.
    fn get_progress(&self) -> f32;
}

impl RmCallbackHandler for TaskScheduler {
    fn on_containers_allocated(&self, containers: Vec<AllocatedContainer>) {
        Self::on_containers_allocated(self, containers);
    }

    fn on_containers_completed(&self, statuses: Vec<ContainerStatus>) {
        Self::on_containers_completed(self, statuses);
    }

    fn on_nodes_updated(&self, nodes: Vec<NodeReport>) {
        Self::on_nodes_updated(self, nodes);
    }

    fn on_shutdown_request(&self) {
        Self::on_shutdown_request(self);
    }

    fn on_error(&self, cause: anyhow::Error) {
        Self::on_error(self, cause);
    }

    fn get_progress(&self) -> f32 {
        self.progress()
    }
}

/// Applies cluster events to a scheduler on a dedicated thread, in arrival
/// order, and runs [`TaskScheduler::tick`] at least once per interval, busy
/// or not.
///
/// The inbound queue is bounded; a protocol client that outruns the
/// scheduler blocks in [`SchedulerEventLoop::submit`].
#[derive(Debug)]
pub struct SchedulerEventLoop {
    event_tx: Mutex<Option<Sender<RmEvent>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerEventLoop {
    /// Start the loop.
    ///
    /// # Errors
    ///
    /// `Config` when the thread cannot be spawned.
    pub fn spawn(scheduler: Arc<TaskScheduler>, config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let (event_tx, event_rx) = bounded::<RmEvent>(config.event_queue_depth);
        let tick = Duration::from_millis(config.idle_check_interval_ms);

        let handle = thread::Builder::new()
            .name("scheduler-events".into())
            .spawn(move || {
                debug!("Scheduler event loop started");
                let mut next_tick = Instant::now() + tick;
                loop {
                    let wait = next_tick.saturating_duration_since(Instant::now());
                    match event_rx.recv_timeout(wait) {
                        Ok(event) => scheduler.handle_event(event),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if Instant::now() >= next_tick {
                        scheduler.tick(now_ms());
                        next_tick = Instant::now() + tick;
                    }
                }
                debug!("Scheduler event loop exiting");
            })
            .map_err(|e| SchedulerError::Config(format!("failed to spawn event loop: {e}")))?;

        info!(queue_depth = config.event_queue_depth, "Scheduler event loop started");
        Ok(Self {
            event_tx: Mutex::new(Some(event_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// A sender for the protocol client. Senders keep the loop alive until
    /// they are dropped.
    #[must_use]
    pub fn sender(&self) -> Option<Sender<RmEvent>> {
        self.event_tx.lock().as_ref().cloned()
    }

    /// Queue an event, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// `Stopped` once the loop has been stopped.
    pub fn submit(&self, event: RmEvent) -> Result<(), SchedulerError> {
        let sender = self.sender().ok_or(SchedulerError::Stopped)?;
        sender
            .send(event)
            .map_err(|SendError(_)| SchedulerError::Stopped)
    }

    /// Stop accepting events, apply what is queued, and join the thread.
    pub fn stop(&self) {
        self.event_tx.lock().take();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Scheduler event loop panicked");
            } else {
                info!("Scheduler event loop stopped");
            }
        }
    }
}

impl Drop for SchedulerEventLoop {
    fn drop(&mut self) {
        self.event_tx.lock().take();
    }
}
