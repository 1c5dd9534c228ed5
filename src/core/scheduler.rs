//! The task scheduler: turns task requests into cluster container requests,
//! assigns granted containers, reuses idle ones, and preempts lower-priority
//! work when the cluster is full.
//!
//! # Concurrency
//!
//! All bookkeeping lives behind one state lock, shared by the application
//! request path and the cluster callback path. Decisions taken under the lock
//! append their side effects (cluster calls, application callbacks) to an
//! ordered outbox. The outbox is applied after the lock is released by a
//! single flusher at a time, so effects leave in the order the decisions were
//! made and no callback or cluster call ever runs under the state lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::audit::{build_audit_event, AuditAction, AuditEvent, AuditSink};
use crate::core::callback::{AppCallbackDispatcher, AppFinalStatus, TaskSchedulerAppCallback};
use crate::core::dispatcher::DispatcherStats;
use crate::core::ledger::{
    AllocatedContainer, Assignment, ContainerRequest, CookieStatus, RequestLedger, RequestState,
    TaskRequest,
};
use crate::core::matcher::ContainerSignatureMatcher;
use crate::core::preemption::{pick_idle_container, plan_preemption_within, PreemptionPlan};
use crate::core::{DispatchError, LedgerError, MatchError, SchedulerError};
use crate::infra::events::RmEvent;
use crate::infra::rm::ResourceManagerClient;
use crate::util::clock::now_ms;
use crate::util::serde::{
    ContainerId, ContainerStatus, Cookie, FinalApplicationStatus, NodeReport, Resource, TaskId,
};

/// Failure reports kept for redelivery while the callback queue is full.
const MAX_UNDELIVERED_REPORTS: usize = 256;

/// A side effect decided under the state lock and applied after it.
enum Effect {
    AddContainerRequest(ContainerRequest),
    RemoveContainerRequest(Cookie),
    ReleaseContainer(ContainerId),
    TaskAllocated {
        task: TaskId,
        cookie: Cookie,
        container: AllocatedContainer,
    },
    ContainerCompleted {
        task: Option<TaskId>,
        status: ContainerStatus,
    },
    ContainerBeingReleased(ContainerId),
    NodesUpdated(Vec<NodeReport>),
    ShutdownRequested,
    Error(anyhow::Error),
}

struct SchedulerState {
    ledger: RequestLedger,
    outbox: VecDeque<Effect>,
    max_capability: Option<Resource>,
    /// Containers returned without ever being held, with the time of the
    /// release. Their completions are expected and not reported.
    released_unheld: HashMap<ContainerId, u128>,
    /// Failure reports for `on_error` that found the callback queue full.
    undelivered: VecDeque<String>,
}

/// Point-in-time view of the scheduler's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Requests waiting for a container.
    pub outstanding_requests: usize,
    /// Requests running in a container.
    pub allocated_requests: usize,
    /// Requests whose container is being taken away.
    pub releasing_requests: usize,
    /// Containers retained for reuse.
    pub idle_containers: usize,
    /// Size of the held container set.
    pub held_containers: usize,
    /// Capability of all outstanding requests.
    pub outstanding_resources: Resource,
    /// Allotment of held containers not on their way out.
    pub held_resources: Resource,
    /// Allotment on its way back to the cluster.
    pub releasing_resources: Resource,
    /// Containers returned on arrival whose completion is still expected.
    pub awaiting_completion: usize,
    /// Failure reports waiting for room in the callback queue.
    pub undelivered_reports: usize,
    /// Registered maximum container capability.
    pub max_capability: Option<Resource>,
    /// Callback dispatcher counters.
    pub dispatcher: DispatcherStats,
}

/// Container scheduler for one application.
pub struct TaskScheduler {
    config: SchedulerConfig,
    matcher: Arc<dyn ContainerSignatureMatcher>,
    client: Arc<dyn ResourceManagerClient>,
    app: AppCallbackDispatcher,
    state: Mutex<SchedulerState>,
    flush_lock: Mutex<()>,
    audit: Option<Mutex<Box<dyn AuditSink>>>,
    last_progress: Mutex<f32>,
    registered: AtomicBool,
    stopped: AtomicBool,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("config", &self.config)
            .field("registered", &self.registered.load(Ordering::Acquire))
            .field("stopped", &self.stopped.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl TaskScheduler {
    /// Create a scheduler. Nothing is sent to the cluster until
    /// [`TaskScheduler::start`].
    ///
    /// # Errors
    ///
    /// `Config` for an invalid configuration, `Dispatch` if the callback
    /// workers cannot be started.
    pub fn new(
        config: SchedulerConfig,
        matcher: Arc<dyn ContainerSignatureMatcher>,
        client: Arc<dyn ResourceManagerClient>,
        app: Arc<dyn TaskSchedulerAppCallback>,
        audit: Option<Box<dyn AuditSink>>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::Config)?;
        let app = AppCallbackDispatcher::new(app, config.dispatcher.clone())?;
        Ok(Self {
            config,
            matcher,
            client,
            app,
            state: Mutex::new(SchedulerState {
                ledger: RequestLedger::new(),
                outbox: VecDeque::new(),
                max_capability: None,
                released_unheld: HashMap::new(),
                undelivered: VecDeque::new(),
            }),
            flush_lock: Mutex::new(()),
            audit: audit.map(Mutex::new),
            last_progress: Mutex::new(0.0),
            registered: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Scheduler configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register with the cluster and hand the registration data to the
    /// application.
    ///
    /// # Errors
    ///
    /// `Registration` when the cluster refuses, `Stopped` after `stop`.
    pub fn start(&self) -> Result<(), SchedulerError> {
        self.ensure_running()?;
        let response = self
            .client
            .register_application_master(
                &self.config.app_host,
                self.config.app_port,
                &self.config.tracking_url,
            )
            .map_err(SchedulerError::Registration)?;

        self.state.lock().max_capability = Some(response.max_capability);
        self.registered.store(true, Ordering::Release);
        info!(
            host = %self.config.app_host,
            port = self.config.app_port,
            max_capability = %response.max_capability,
            "Registered application master"
        );

        self.app.set_application_registration_data(
            response.max_capability,
            response.acls,
            response.client_to_am_token_key,
        )?;
        Ok(())
    }

    /// Ask for a container for `request`. Returns the request's cookie.
    ///
    /// An idle container whose signature covers the request is reused when
    /// reuse is enabled; otherwise container requests go to the cluster and,
    /// with preemption enabled, lower-priority work may be displaced.
    ///
    /// # Errors
    ///
    /// `CapabilityExceeded` when the request can never be granted, `Match`
    /// when the matcher rejects its input, `Stopped` after `stop`.
    pub fn request_task(&self, request: TaskRequest) -> Result<Cookie, SchedulerError> {
        self.ensure_running()?;
        let result = {
            let mut state = self.state.lock();
            self.request_locked(&mut state, request)
        };
        self.flush();
        result
    }

    /// The task owning `cookie` is done with its request.
    ///
    /// An outstanding request is withdrawn. An allocated request's container
    /// is kept for reuse when the task succeeded and reuse is enabled, and
    /// released otherwise. Returns the container the task held, if any.
    ///
    /// # Errors
    ///
    /// `UnknownCookie` for a cookie that is not live.
    pub fn deallocate_task(
        &self,
        cookie: Cookie,
        task_succeeded: bool,
    ) -> Result<Option<ContainerId>, SchedulerError> {
        let result = {
            let mut state = self.state.lock();
            self.deallocate_task_locked(&mut state, cookie, task_succeeded)
        };
        self.flush();
        result
    }

    /// Return a held container to the cluster. This is also how the
    /// application acknowledges `container_being_released`.
    ///
    /// Releasing a container twice is a no-op.
    ///
    /// # Errors
    ///
    /// `UnknownContainer` when the container is not held.
    pub fn deallocate_container(&self, container_id: &ContainerId) -> Result<(), SchedulerError> {
        let result = {
            let mut state = self.state.lock();
            match state.ledger.release_container(container_id) {
                Ok(task) => {
                    self.release_effects(&mut state, container_id, task, "deallocated");
                    Ok(())
                }
                Err(LedgerError::AlreadyReleased(_)) => {
                    debug!(container = %container_id, "Container already released");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        };
        self.flush();
        result
    }

    /// Run the preemption policy for the most important outstanding request.
    ///
    /// # Errors
    ///
    /// `Match` when the matcher rejects its input.
    pub fn preempt_if_needed(&self) -> Result<(), SchedulerError> {
        if !self.config.preemption_enabled {
            return Ok(());
        }
        let result = {
            let mut state = self.state.lock();
            self.preempt_locked(&mut state)
        };
        self.flush();
        result.map_err(SchedulerError::from)
    }

    /// Release idle containers whose idle period exceeded the configured
    /// timeout at `now_ms`. Returns how many were released.
    pub fn release_idle_containers(&self, now_ms: u128) -> usize {
        let Some(timeout_ms) = self.config.idle_release_timeout_ms else {
            return 0;
        };
        let released = {
            let mut state = self.state.lock();
            let expired = state.ledger.expired_idle_containers(now_ms, timeout_ms);
            let mut released = 0;
            for id in expired {
                if self.release_locked(&mut state, &id, "idle timeout") {
                    released += 1;
                }
            }
            released
        };
        if released > 0 {
            info!(released, timeout_ms, "Released expired idle containers");
        }
        self.flush();
        released
    }

    /// Periodic housekeeping at `now_ms`: releases expired idle containers,
    /// forgets released containers whose completion never came, re-evaluates
    /// preemption and retries undelivered failure reports. Returns how many
    /// idle containers were released.
    pub fn tick(&self, now_ms: u128) -> usize {
        let released = self.release_idle_containers(now_ms);
        {
            let mut state = self.state.lock();
            let grace_ms = u128::from(self.config.release_completion_timeout_ms);
            let before = state.released_unheld.len();
            state
                .released_unheld
                .retain(|_, released_at| now_ms.saturating_sub(*released_at) < grace_ms);
            let forgotten = before - state.released_unheld.len();
            if forgotten > 0 {
                debug!(forgotten, "Stopped waiting for completions of released containers");
            }
            if self.config.preemption_enabled && !self.is_stopped() {
                if let Err(e) = self.preempt_locked(&mut state) {
                    warn!(error = %e, "Preemption check failed");
                }
            }
        }
        self.flush();
        released
    }

    /// Containers granted by the cluster.
    ///
    /// Preemption is re-evaluated afterwards, since the grants change which
    /// requests are still waiting. Completions do not trigger it: the
    /// headroom last reported does not yet include what they freed.
    pub fn on_containers_allocated(&self, containers: Vec<AllocatedContainer>) {
        {
            let mut state = self.state.lock();
            for container in containers {
                self.assign_new_container_locked(&mut state, container);
            }
            if self.config.preemption_enabled && !self.is_stopped() {
                if let Err(e) = self.preempt_locked(&mut state) {
                    warn!(error = %e, "Preemption check failed");
                }
            }
        }
        self.flush();
    }

    /// Containers reported finished by the cluster.
    pub fn on_containers_completed(&self, statuses: Vec<ContainerStatus>) {
        {
            let mut state = self.state.lock();
            for status in statuses {
                self.complete_locked(&mut state, status);
            }
        }
        self.flush();
    }

    /// Node updates from the cluster.
    pub fn on_nodes_updated(&self, nodes: Vec<NodeReport>) {
        self.push_and_flush(Effect::NodesUpdated(nodes));
    }

    /// The cluster asked the application to shut down.
    pub fn on_shutdown_request(&self) {
        info!("Cluster requested application shutdown");
        self.push_and_flush(Effect::ShutdownRequested);
    }

    /// The protocol client hit an asynchronous error.
    pub fn on_error(&self, cause: anyhow::Error) {
        error!(error = %cause, "Resource manager client error");
        self.push_and_flush(Effect::Error(cause));
    }

    /// Apply one cluster event.
    pub fn handle_event(&self, event: RmEvent) {
        match event {
            RmEvent::ContainersAllocated(containers) => self.on_containers_allocated(containers),
            RmEvent::ContainersCompleted(statuses) => self.on_containers_completed(statuses),
            RmEvent::NodesUpdated(nodes) => self.on_nodes_updated(nodes),
            RmEvent::ShutdownRequested => self.on_shutdown_request(),
            RmEvent::Error(cause) => self.on_error(cause),
        }
    }

    /// Application progress in `[0, 1]`, as reported by the application.
    ///
    /// When the application cannot answer the last known value is returned.
    pub fn progress(&self) -> f32 {
        let mut last = self.last_progress.lock();
        match self.app.get_progress() {
            Ok(p) if p.is_finite() => {
                *last = p.clamp(0.0, 1.0);
            }
            Ok(p) => warn!(progress = p, "Application reported non-finite progress"),
            Err(e) => warn!(error = %e, "Could not read application progress"),
        }
        *last
    }

    /// Unregister with the application's final status and stop delivering
    /// callbacks. Pending callbacks are drained first. Calling this twice is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// `Unregistration` when the cluster refuses.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush();

        let mut result = Ok(());
        if self.registered.swap(false, Ordering::AcqRel) {
            let status = self.app.get_final_app_status().unwrap_or_else(|e| {
                warn!(error = %e, "Could not read final status, unregistering as undefined");
                AppFinalStatus::new(FinalApplicationStatus::Undefined, e.to_string())
            });
            let tracking_url = if status.tracking_url.is_empty() {
                self.config.tracking_url.as_str()
            } else {
                status.tracking_url.as_str()
            };
            result = self
                .client
                .unregister_application_master(status.status, &status.message, tracking_url)
                .map_err(SchedulerError::Unregistration);
            if result.is_ok() {
                info!(status = ?status.status, "Unregistered application master");
            }
        }

        if let Err(e) = self.app.drain() {
            warn!(error = %e, "Callbacks still pending at stop");
        }
        self.app.shutdown();
        result
    }

    /// True once `stop` has run.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Wait for every callback dispatched so far to finish.
    ///
    /// # Errors
    ///
    /// `DrainTimeout` with the number still pending.
    pub fn drain(&self) -> Result<(), DispatchError> {
        self.app.drain()
    }

    /// [`TaskScheduler::drain`] with an explicit deadline.
    ///
    /// # Errors
    ///
    /// `DrainTimeout` with the number still pending.
    pub fn drain_timeout(&self, timeout: Duration) -> Result<(), DispatchError> {
        self.app.drain_timeout(timeout)
    }

    /// Async variant of [`TaskScheduler::drain_timeout`].
    ///
    /// # Errors
    ///
    /// `DrainTimeout` or `Internal`.
    #[cfg(feature = "tokio-runtime")]
    pub async fn drain_async(&self, timeout: Duration) -> Result<(), DispatchError> {
        self.app.drain_async(timeout).await
    }

    /// State of a live request.
    #[must_use]
    pub fn request_state(&self, cookie: Cookie) -> Option<RequestState> {
        self.state.lock().ledger.state_of(cookie)
    }

    /// Container assigned to a live request.
    #[must_use]
    pub fn container_of(&self, cookie: Cookie) -> Option<ContainerId> {
        self.state.lock().ledger.container_of(cookie).cloned()
    }

    /// Run `f` against the ledger under the state lock.
    pub fn with_ledger<R>(&self, f: impl FnOnce(&RequestLedger) -> R) -> R {
        f(&self.state.lock().ledger)
    }

    /// Bookkeeping counters.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.state.lock();
        let ledger = &state.ledger;
        SchedulerSnapshot {
            outstanding_requests: ledger.count_in(RequestState::Pending)
                + ledger.count_in(RequestState::Requested),
            allocated_requests: ledger.count_in(RequestState::Allocated),
            releasing_requests: ledger.count_in(RequestState::Releasing),
            idle_containers: ledger.idle_containers().len(),
            held_containers: ledger.held_containers().count(),
            outstanding_resources: ledger.outstanding_resources(),
            held_resources: ledger.held_resources(),
            releasing_resources: ledger.releasing_resources(),
            awaiting_completion: state.released_unheld.len(),
            undelivered_reports: state.undelivered.len(),
            max_capability: state.max_capability,
            dispatcher: self.app.stats(),
        }
    }

    /// Events retained by the audit sink.
    #[must_use]
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit
            .as_ref()
            .map(|sink| sink.lock().events())
            .unwrap_or_default()
    }

    fn ensure_running(&self) -> Result<(), SchedulerError> {
        if self.stopped.load(Ordering::Acquire) {
            Err(SchedulerError::Stopped)
        } else {
            Ok(())
        }
    }

    fn request_locked(
        &self,
        state: &mut SchedulerState,
        request: TaskRequest,
    ) -> Result<Cookie, SchedulerError> {
        if let Some(max) = state.max_capability {
            if !max.covers(&request.capability) {
                return Err(SchedulerError::CapabilityExceeded {
                    requested: request.capability,
                    max,
                });
            }
        }

        let reuse = if self.config.reuse_enabled {
            pick_idle_container(state.ledger.held_containers(), &request, self.matcher.as_ref())?
        } else {
            None
        };

        let task = request.task;
        let cookie = state.ledger.add_request(request);

        if let Some(container_id) = reuse {
            let (container, _) = state.ledger.assign_idle(cookie, &container_id)?;
            debug!(%cookie, %task, container = %container_id, "Reusing idle container");
            self.record(AuditAction::Reused, Some(cookie), Some(task), Some(container_id), None);
            state.outbox.push_back(Effect::TaskAllocated {
                task,
                cookie,
                container,
            });
            return Ok(cookie);
        }

        let tiers = ContainerRequest::tiers_for(cookie, state.ledger.lookup_by_cookie(cookie)?);
        state.ledger.mark_requested(cookie, tiers.clone())?;
        debug!(%cookie, %task, tiers = tiers.len(), "Requesting container");
        self.record(
            AuditAction::Requested,
            Some(cookie),
            Some(task),
            None,
            Some(format!("{} tiers", tiers.len())),
        );
        state
            .outbox
            .extend(tiers.into_iter().map(Effect::AddContainerRequest));

        if self.config.preemption_enabled {
            if let Err(e) = self.preempt_locked(state) {
                warn!(%cookie, error = %e, "Preemption check failed");
            }
        }
        Ok(cookie)
    }

    fn deallocate_task_locked(
        &self,
        state: &mut SchedulerState,
        cookie: Cookie,
        task_succeeded: bool,
    ) -> Result<Option<ContainerId>, SchedulerError> {
        let status = state
            .ledger
            .state_of(cookie)
            .ok_or(LedgerError::UnknownCookie(cookie))?;
        match status {
            RequestState::Pending | RequestState::Requested => {
                let removed = state.ledger.remove_request(cookie)?;
                if removed.previous_state == RequestState::Requested {
                    state.outbox.push_back(Effect::RemoveContainerRequest(cookie));
                }
                debug!(%cookie, task = %removed.request.task, "Withdrew outstanding request");
                self.record(
                    AuditAction::Withdrawn,
                    Some(cookie),
                    Some(removed.request.task),
                    None,
                    None,
                );
                Ok(None)
            }
            RequestState::Allocated => {
                let container_id = state
                    .ledger
                    .container_of(cookie)
                    .cloned()
                    .ok_or(LedgerError::UnknownCookie(cookie))?;
                if task_succeeded && self.config.reuse_enabled {
                    let removed = state.ledger.remove_request(cookie)?;
                    debug!(%cookie, container = %container_id, "Container kept for reuse");
                    self.record(
                        AuditAction::Idled,
                        Some(cookie),
                        Some(removed.request.task),
                        Some(container_id.clone()),
                        None,
                    );
                    self.offer_idle_locked(state, &container_id)?;
                } else {
                    self.release_locked(state, &container_id, "task finished");
                }
                Ok(Some(container_id))
            }
            RequestState::Releasing => {
                // The application gives the container up before acknowledging.
                let container_id = state
                    .ledger
                    .container_of(cookie)
                    .cloned()
                    .ok_or(LedgerError::UnknownCookie(cookie))?;
                self.release_locked(state, &container_id, "preempted task finished");
                Ok(Some(container_id))
            }
            RequestState::Completed | RequestState::Released => {
                Err(LedgerError::UnknownCookie(cookie).into())
            }
        }
    }

    /// Hand a newly idle container to the most important outstanding request
    /// it can serve.
    fn offer_idle_locked(
        &self,
        state: &mut SchedulerState,
        container_id: &ContainerId,
    ) -> Result<(), MatchError> {
        let Some(held) = state.ledger.held(container_id) else {
            return Ok(());
        };
        let mut chosen = None;
        for (cookie, request) in state.ledger.outstanding() {
            if self
                .matcher
                .is_super_set(Some(&held.signature), Some(&request.signature))?
                && held.container.resource.covers(&request.capability)
            {
                chosen = Some(cookie);
                break;
            }
        }
        let Some(cookie) = chosen else {
            return Ok(());
        };

        match state.ledger.assign_idle(cookie, container_id) {
            Ok((container, previous)) => {
                if previous == RequestState::Requested {
                    state.outbox.push_back(Effect::RemoveContainerRequest(cookie));
                }
                let task = state.ledger.lookup_by_cookie(cookie).map(|r| r.task).ok();
                if let Some(task) = task {
                    debug!(%cookie, %task, container = %container_id, "Reusing idle container");
                    self.record(
                        AuditAction::Reused,
                        Some(cookie),
                        Some(task),
                        Some(container_id.clone()),
                        None,
                    );
                    state.outbox.push_back(Effect::TaskAllocated {
                        task,
                        cookie,
                        container,
                    });
                }
            }
            Err(e) => warn!(%cookie, container = %container_id, error = %e, "Idle reuse failed"),
        }
        Ok(())
    }

    fn assign_new_container_locked(&self, state: &mut SchedulerState, container: AllocatedContainer) {
        let id = container.id.clone();
        if state.ledger.held(&id).is_some() {
            warn!(container = %id, "Container granted twice, ignoring duplicate");
            return;
        }
        let cookie = container
            .cookie
            .or_else(|| state.ledger.match_outstanding(&container));
        let Some(cookie) = cookie else {
            warn!(container = %id, priority = container.priority.0, "No request for granted container, releasing");
            self.record(AuditAction::Unsolicited, None, None, Some(id.clone()), None);
            self.release_unheld(state, id);
            return;
        };

        match state.ledger.classify_cookie(cookie) {
            CookieStatus::Live(current) if current.is_outstanding() => {
                match state.ledger.record_allocation(cookie, container) {
                    Ok(previous) => {
                        if previous == RequestState::Requested {
                            state.outbox.push_back(Effect::RemoveContainerRequest(cookie));
                        }
                        let task = state.ledger.lookup_by_cookie(cookie).map(|r| r.task).ok();
                        let assigned = state.ledger.held(&id).map(|h| h.container.clone());
                        if let (Some(task), Some(container)) = (task, assigned) {
                            debug!(%cookie, %task, container = %id, "Assigned granted container");
                            self.record(AuditAction::Allocated, Some(cookie), Some(task), Some(id), None);
                            state.outbox.push_back(Effect::TaskAllocated {
                                task,
                                cookie,
                                container,
                            });
                        }
                    }
                    Err(e) => {
                        warn!(%cookie, container = %id, error = %e, "Could not assign granted container, releasing");
                        self.release_unheld(state, id);
                    }
                }
            }
            CookieStatus::Live(current) => {
                debug!(%cookie, state = ?current, container = %id, "Request already satisfied, releasing surplus container");
                self.record(
                    AuditAction::Unsolicited,
                    Some(cookie),
                    None,
                    Some(id.clone()),
                    Some("surplus".into()),
                );
                self.release_unheld(state, id);
            }
            CookieStatus::Retired => {
                info!(%cookie, container = %id, "Container arrived for withdrawn request, releasing");
                self.record(AuditAction::LateAllocation, Some(cookie), None, Some(id.clone()), None);
                self.release_unheld(state, id);
            }
            CookieStatus::Unknown => {
                warn!(%cookie, container = %id, "Container carries a cookie never issued, releasing");
                self.record(AuditAction::Unsolicited, Some(cookie), None, Some(id.clone()), None);
                self.release_unheld(state, id);
            }
        }
    }

    fn complete_locked(&self, state: &mut SchedulerState, status: ContainerStatus) {
        let id = status.container_id.clone();
        match state.ledger.record_completion(&id) {
            Ok(done) => {
                debug!(container = %id, task = ?done.task, exit_status = status.exit_status, "Container completed");
                self.record(
                    AuditAction::Completed,
                    done.cookie,
                    done.task,
                    Some(id),
                    Some(format!("exit {}", status.exit_status)),
                );
                state.outbox.push_back(Effect::ContainerCompleted {
                    task: done.task,
                    status,
                });
            }
            Err(_) if state.released_unheld.remove(&id).is_some() => {
                debug!(container = %id, "Completion for container released on arrival");
            }
            Err(e) => {
                warn!(container = %id, error = %e, "Completion for container not held");
            }
        }
    }

    /// Walk outstanding requests from most to least important. Each request
    /// claims its capability from the headroom plus what is already on its
    /// way back; a request that cannot be covered gets containers preempted
    /// for it. The walk stops at the first request nothing can be freed for.
    fn preempt_locked(&self, state: &mut SchedulerState) -> Result<(), MatchError> {
        let Some(headroom) = self.client.available_resources() else {
            return Ok(());
        };
        let pending: Vec<(Cookie, TaskRequest)> = state
            .ledger
            .outstanding()
            .into_iter()
            .map(|(cookie, request)| (cookie, request.clone()))
            .collect();

        let mut available = headroom.saturating_add(&state.ledger.releasing_resources());
        for (cookie, request) in pending {
            if available.covers(&request.capability) {
                available = available.saturating_sub(&request.capability);
                continue;
            }
            let plan =
                plan_preemption_within(&state.ledger, &request, available, self.matcher.as_ref())?;
            if plan.is_empty() {
                debug!(%cookie, priority = request.priority.0, "Nothing to preempt for pending request");
                break;
            }
            available = available
                .saturating_add(&plan.freed)
                .saturating_sub(&request.capability);
            self.apply_preemption_locked(state, cookie, &request, plan);
        }
        Ok(())
    }

    fn apply_preemption_locked(
        &self,
        state: &mut SchedulerState,
        cookie: Cookie,
        pending: &TaskRequest,
        plan: PreemptionPlan,
    ) {
        info!(
            %cookie,
            priority = pending.priority.0,
            idle = plan.release_idle.len(),
            active = plan.preempt_active.len(),
            "Preempting containers for pending request"
        );

        for id in plan.release_idle {
            self.release_locked(state, &id, "preempted while idle");
        }
        for id in plan.preempt_active {
            match state.ledger.begin_release(&id) {
                Ok(victim) => {
                    let task = state.ledger.lookup_by_cookie(victim).map(|r| r.task).ok();
                    self.record(
                        AuditAction::Preempted,
                        Some(victim),
                        task,
                        Some(id.clone()),
                        Some(format!("for {cookie}")),
                    );
                    state.outbox.push_back(Effect::ContainerBeingReleased(id));
                }
                Err(e) => warn!(container = %id, error = %e, "Could not preempt container"),
            }
        }
    }

    /// Release a held container. Returns false when it was already released.
    fn release_locked(&self, state: &mut SchedulerState, id: &ContainerId, reason: &str) -> bool {
        match state.ledger.release_container(id) {
            Ok(task) => {
                self.release_effects(state, id, task, reason);
                true
            }
            Err(LedgerError::AlreadyReleased(_)) => false,
            Err(e) => {
                warn!(container = %id, error = %e, "Release of container not held");
                false
            }
        }
    }

    fn release_effects(
        &self,
        state: &mut SchedulerState,
        id: &ContainerId,
        task: Option<TaskId>,
        reason: &str,
    ) {
        debug!(container = %id, task = ?task, reason, "Releasing container");
        self.record(
            AuditAction::Released,
            None,
            task,
            Some(id.clone()),
            Some(reason.to_string()),
        );
        state.outbox.push_back(Effect::ReleaseContainer(id.clone()));
    }

    fn release_unheld(&self, state: &mut SchedulerState, id: ContainerId) {
        state.released_unheld.insert(id.clone(), now_ms());
        state.outbox.push_back(Effect::ReleaseContainer(id));
    }

    fn record(
        &self,
        action: AuditAction,
        cookie: Option<Cookie>,
        task: Option<TaskId>,
        container_id: Option<ContainerId>,
        detail: Option<String>,
    ) {
        if let Some(sink) = &self.audit {
            sink.lock()
                .record(build_audit_event(action, cookie, task, container_id, detail));
        }
    }

    fn push_and_flush(&self, effect: Effect) {
        self.state.lock().outbox.push_back(effect);
        self.flush();
    }

    /// Apply queued effects in order.
    ///
    /// Only one thread flushes at a time. A thread that finds another
    /// flushing leaves its effects to it; the flusher re-checks the outbox
    /// after letting go of the flush lock so nothing is stranded.
    fn flush(&self) {
        loop {
            let Some(guard) = self.flush_lock.try_lock() else {
                return;
            };
            self.redeliver_reports();
            loop {
                let batch: Vec<Effect> = self.state.lock().outbox.drain(..).collect();
                if batch.is_empty() {
                    break;
                }
                for effect in batch {
                    self.apply(effect);
                }
            }
            drop(guard);
            if self.state.lock().outbox.is_empty() {
                return;
            }
        }
    }

    /// Hand held-back failure reports to `on_error` while the queue has room.
    /// Never waits for space.
    fn redeliver_reports(&self) {
        let mut pending = std::mem::take(&mut self.state.lock().undelivered);
        while let Some(report) = pending.pop_front() {
            match self.app.try_on_error(anyhow::anyhow!(report.clone())) {
                Ok(()) => {}
                Err(DispatchError::Shutdown) => {
                    pending.clear();
                }
                Err(_) => {
                    pending.push_front(report);
                    break;
                }
            }
        }
        if pending.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        // Reports added meanwhile go after the older ones.
        pending.append(&mut state.undelivered);
        state.undelivered = pending;
    }

    fn apply(&self, effect: Effect) {
        match effect {
            Effect::AddContainerRequest(request) => self.client.add_container_request(&request),
            Effect::RemoveContainerRequest(cookie) => self.client.remove_container_request(cookie),
            Effect::ReleaseContainer(id) => self.client.release_assigned_container(&id),
            Effect::TaskAllocated {
                task,
                cookie,
                container,
            } => {
                let id = container.id.clone();
                if let Err(e) = self.app.task_allocated(task, cookie, container) {
                    self.allocation_undelivered(task, cookie, &id, &e);
                }
            }
            Effect::ContainerCompleted { task, status } => {
                let id = status.container_id.clone();
                if let Err(e) = self.app.container_completed(task, status) {
                    self.report_undelivered(format!("container_completed for container {id}"), &e);
                }
            }
            Effect::ContainerBeingReleased(id) => {
                if let Err(e) = self.app.container_being_released(id.clone()) {
                    self.release_notice_undelivered(&id, &e);
                }
            }
            Effect::NodesUpdated(nodes) => {
                if let Err(e) = self.app.nodes_updated(nodes) {
                    self.report_undelivered("nodes_updated".to_string(), &e);
                }
            }
            Effect::ShutdownRequested => {
                if let Err(e) = self.app.app_shutdown_requested() {
                    self.report_undelivered("app_shutdown_requested".to_string(), &e);
                }
            }
            Effect::Error(cause) => {
                let message = format!("{cause:#}");
                if let Err(e) = self.app.on_error(cause) {
                    error!(error = %e, cause = %message, "Failed to deliver application error");
                    self.hold_report(&e, message);
                }
            }
        }
    }

    /// The application never heard about the allocation, so the container
    /// goes back to the cluster and the request ends.
    fn allocation_undelivered(
        &self,
        task: TaskId,
        cookie: Cookie,
        container_id: &ContainerId,
        cause: &DispatchError,
    ) {
        error!(%cookie, %task, container = %container_id, error = %cause, "Failed to deliver allocation, releasing container");
        let mut state = self.state.lock();
        let still_assigned = state.ledger.container_of(cookie) == Some(container_id)
            && state.ledger.state_of(cookie) == Some(RequestState::Allocated);
        if still_assigned {
            self.release_locked(&mut state, container_id, "allocation undeliverable");
        }
        drop(state);
        self.hold_report(
            cause,
            format!(
                "task_allocated for {task} ({cookie}) in container {container_id} was not delivered: {cause}; the container was released"
            ),
        );
    }

    /// Without the notice the application cannot acknowledge, so the
    /// container is released straight away.
    fn release_notice_undelivered(&self, container_id: &ContainerId, cause: &DispatchError) {
        error!(container = %container_id, error = %cause, "Failed to deliver release notice, releasing container");
        let mut state = self.state.lock();
        let awaiting_ack = matches!(
            state.ledger.held(container_id).map(|h| &h.assignment),
            Some(Assignment::BeingReleased { .. })
        );
        if awaiting_ack {
            self.release_locked(&mut state, container_id, "release notice undeliverable");
        }
        drop(state);
        self.hold_report(
            cause,
            format!(
                "container_being_released for container {container_id} was not delivered: {cause}; the container was released"
            ),
        );
    }

    fn report_undelivered(&self, what: String, cause: &DispatchError) {
        error!(callback = %what, error = %cause, "Failed to deliver application callback");
        self.hold_report(cause, format!("{what} was not delivered: {cause}"));
    }

    /// Keep `report` for `on_error` until the queue has room. Nothing is
    /// kept once the dispatcher is shut down.
    fn hold_report(&self, cause: &DispatchError, report: String) {
        if *cause == DispatchError::Shutdown {
            return;
        }
        let mut state = self.state.lock();
        if state.undelivered.len() >= MAX_UNDELIVERED_REPORTS {
            state.undelivered.pop_front();
            warn!(limit = MAX_UNDELIVERED_REPORTS, "Dropping oldest undelivered failure report");
        }
        state.undelivered.push_back(report);
    }
}
