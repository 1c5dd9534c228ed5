//! Tests for utility functions

use container_scheduler::util::clock::now_ms;
use container_scheduler::util::serde::{
    ContainerId, ContainerState, ContainerStatus, Cookie, NodeId, Priority, Resource, TaskId,
};
use container_scheduler::util::telemetry::init_tracing;

#[test]
fn test_priority_smaller_is_more_important() {
    assert!(Priority(1).outranks(Priority(2)));
    assert!(!Priority(2).outranks(Priority(1)));
    assert!(!Priority(3).outranks(Priority(3)));
}

#[test]
fn test_resource_covers() {
    let big = Resource::new(2048, 2);
    assert!(big.covers(&Resource::new(1024, 2)));
    assert!(big.covers(&big));
    assert!(!big.covers(&Resource::new(4096, 1)));
    assert!(!big.covers(&Resource::new(1024, 4)));
}

#[test]
fn test_resource_arithmetic_saturates() {
    let r = Resource::new(1024, 1);
    assert_eq!(r.saturating_sub(&Resource::new(2048, 4)), Resource::ZERO);
    assert_eq!(
        Resource::new(u64::MAX, u32::MAX).saturating_add(&r),
        Resource::new(u64::MAX, u32::MAX)
    );
    assert!(Resource::ZERO.is_zero());
    assert!(!r.is_zero());
}

#[test]
fn test_slack_orders_memory_before_vcores() {
    let required = Resource::new(1024, 1);
    let more_memory = Resource::new(2048, 1).slack_over(&required);
    let more_cores = Resource::new(1024, 8).slack_over(&required);
    assert_eq!(more_memory, (1024, 0));
    assert_eq!(more_cores, (0, 7));
    assert!(more_cores < more_memory);
}

#[test]
fn test_display_formats() {
    assert_eq!(TaskId(7).to_string(), "task_7");
    assert_eq!(Cookie(3).to_string(), "cookie_3");
    assert_eq!(ContainerId::new("c_01").to_string(), "c_01");
    assert_eq!(NodeId::new("host1", 8041).to_string(), "host1:8041");
    assert_eq!(Resource::new(512, 2).to_string(), "<memory:512MB, vcores:2>");
}

#[test]
fn test_resource_serde_field_names() {
    let json = serde_json::to_value(Resource::new(512, 2)).unwrap();
    assert_eq!(json, serde_json::json!({ "memory_mb": 512, "vcores": 2 }));
}

#[test]
fn test_completed_status() {
    let status = ContainerStatus::completed(ContainerId::new("c1"), 137, "killed");
    assert_eq!(status.state, ContainerState::Complete);
    assert_eq!(status.exit_status, 137);
    assert_eq!(status.diagnostics, "killed");
}

#[test]
fn test_now_ms_advances() {
    let first = now_ms();
    assert!(first > 0);
    assert!(now_ms() >= first);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing("container_scheduler=debug");
    init_tracing("container_scheduler=info");
}
