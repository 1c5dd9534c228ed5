//! Tests for audit sinks

use container_scheduler::core::{
    build_audit_event, AuditAction, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
use container_scheduler::util::serde::{ContainerId, Cookie, TaskId};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    assert!(sink.is_empty());

    let event = build_audit_event(
        AuditAction::Allocated,
        Some(Cookie(1)),
        Some(TaskId(5)),
        Some(ContainerId::new("c1")),
        None,
    );
    sink.record(event.clone());

    assert_eq!(sink.len(), 1);
    assert_eq!(sink.events(), vec![event]);
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);
    for task in 1..=3 {
        sink.record(build_audit_event(
            AuditAction::Requested,
            Some(Cookie(task)),
            Some(TaskId(task)),
            None,
            None,
        ));
    }

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task, Some(TaskId(2))); // oldest dropped
    assert_eq!(events[1].task, Some(TaskId(3)));
}

#[test]
fn test_zero_capacity_sink_keeps_nothing() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(build_audit_event(AuditAction::Released, None, None, None, None));
    assert!(sink.is_empty());
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(
        AuditAction::Preempted,
        Some(Cookie(3)),
        Some(TaskId(9)),
        Some(ContainerId::new("c2")),
        Some("for cookie_4".to_string()),
    );

    assert_eq!(event.action, AuditAction::Preempted);
    assert_eq!(event.cookie, Some(Cookie(3)));
    assert_eq!(event.container_id, Some(ContainerId::new("c2")));
    assert_eq!(event.detail.as_deref(), Some("for cookie_4"));
    assert!(event.created_at_ms > 0);
    assert!(uuid::Uuid::parse_str(&event.event_id).is_ok());

    let other = build_audit_event(AuditAction::Preempted, None, None, None, None);
    assert_ne!(event.event_id, other.event_id);
}

#[test]
fn test_audit_action_serde() {
    let json = serde_json::to_string(&AuditAction::LateAllocation).unwrap();
    assert_eq!(json, "\"late_allocation\"");
}

#[test]
fn test_tracing_sink_retains_nothing() {
    let mut sink = TracingAuditSink;
    sink.record(build_audit_event(AuditAction::Completed, None, None, None, None));
    assert!(sink.events().is_empty());
}
