//! Audit trail of scheduling decisions.
//!
//! The scheduler records one event per decision (request, reuse, allocation,
//! release, preemption, completion). Sinks are synchronous and are called
//! under the scheduler's state lock, so they must not block.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::clock::now_ms;
use crate::util::serde::{ContainerId, Cookie, TaskId};

/// Kind of scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Container requests were sent to the cluster.
    Requested,
    /// An idle container was handed to a request.
    Reused,
    /// A newly granted container was assigned.
    Allocated,
    /// An outstanding request was cancelled.
    Withdrawn,
    /// A finished task's container was kept for reuse.
    Idled,
    /// A container was returned to the cluster.
    Released,
    /// A running task was asked to give up its container.
    Preempted,
    /// The cluster reported a container finished.
    Completed,
    /// A granted container had no request to serve.
    Unsolicited,
    /// A container arrived for a request that was already withdrawn.
    LateAllocation,
}

/// One audited decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// What happened.
    pub action: AuditAction,
    /// Request involved, if any.
    pub cookie: Option<Cookie>,
    /// Task involved, if any.
    pub task: Option<TaskId>,
    /// Container involved, if any.
    pub container_id: Option<ContainerId>,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);

    /// Events retained by the sink, oldest first. Sinks that forward events
    /// elsewhere return nothing.
    fn events(&self) -> Vec<AuditEvent> {
        Vec::new()
    }
}

/// In-memory audit sink for testing and dev.
#[derive(Debug)]
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink keeping at most `max_events`.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

/// Sink that writes events to the tracing log at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::debug!(
            action = ?event.action,
            cookie = ?event.cookie,
            task = ?event.task,
            container = ?event.container_id,
            detail = event.detail.as_deref().unwrap_or(""),
            "Scheduling decision"
        );
    }
}

/// Helper to build an audit event from context.
#[must_use]
pub fn build_audit_event(
    action: AuditAction,
    cookie: Option<Cookie>,
    task: Option<TaskId>,
    container_id: Option<ContainerId>,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4().to_string(),
        action,
        cookie,
        task,
        container_id,
        created_at_ms: now_ms(),
        detail,
    }
}
