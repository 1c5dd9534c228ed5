//! Tests for configuration validation and loading

use std::collections::HashMap;
use std::time::Duration;

use container_scheduler::config::{DispatcherConfig, MatcherKind, SchedulerConfig};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert!(cfg.reuse_enabled);
    assert!(cfg.preemption_enabled);
    assert_eq!(cfg.idle_release_timeout_ms, None);
    assert_eq!(cfg.matcher, MatcherKind::AlwaysMatch);
    assert_eq!(cfg.dispatcher.workers, 1);
    assert_eq!(cfg.release_completion_timeout_ms, 600_000);
}

#[test]
fn test_dispatcher_config_validation() {
    assert!(DispatcherConfig::new().validate().is_ok());
    assert!(DispatcherConfig::new().with_workers(0).validate().is_err());
    assert!(DispatcherConfig::new().with_queue_depth(0).validate().is_err());
    assert!(DispatcherConfig::new()
        .with_drain_timeout(Duration::ZERO)
        .validate()
        .is_err());

    let small_stack = DispatcherConfig {
        thread_stack_size: 1024,
        ..DispatcherConfig::default()
    };
    assert!(small_stack.validate().is_err());
}

#[test]
fn test_dispatcher_timeouts_round_trip_through_millis() {
    let cfg = DispatcherConfig::new()
        .with_drain_timeout(Duration::from_millis(250))
        .with_enqueue_timeout(Duration::from_secs(2))
        .with_call_timeout(Duration::from_millis(40));
    assert_eq!(cfg.drain_timeout(), Duration::from_millis(250));
    assert_eq!(cfg.enqueue_timeout(), Duration::from_secs(2));
    assert_eq!(cfg.call_timeout(), Duration::from_millis(40));
}

#[test]
fn test_scheduler_config_validation() {
    let mut cfg = SchedulerConfig::default();
    cfg.app_host = String::new();
    assert!(cfg.validate().is_err());

    let cfg = SchedulerConfig::default().with_idle_release_timeout_ms(0);
    assert!(cfg.validate().is_err());

    let cfg = SchedulerConfig::default().with_release_completion_timeout_ms(0);
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("release_completion_timeout_ms"));

    let cfg = SchedulerConfig::default().with_dispatcher(DispatcherConfig::new().with_workers(0));
    let err = cfg.validate().unwrap_err();
    assert!(err.starts_with("dispatcher invalid"));
}

#[test]
fn test_from_json_str_fills_defaults() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{
            "app_host": "am.example",
            "matcher": "launch_context",
            "idle_release_timeout_ms": 30000,
            "dispatcher": { "workers": 4 }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.app_host, "am.example");
    assert_eq!(cfg.matcher, MatcherKind::LaunchContext);
    assert_eq!(cfg.idle_release_timeout_ms, Some(30_000));
    assert_eq!(cfg.dispatcher.workers, 4);
    assert_eq!(cfg.dispatcher.queue_depth, 1024);
    assert!(cfg.reuse_enabled);
}

#[test]
fn test_from_json_str_rejects_bad_input() {
    let err = SchedulerConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));

    let err = SchedulerConfig::from_json_str(r#"{ "event_queue_depth": 0 }"#).unwrap_err();
    assert!(err.contains("event_queue_depth"));
}

#[test]
fn test_from_lookup_overrides() {
    let cfg = SchedulerConfig::from_lookup(lookup(&[
        ("SCHEDULER_APP_HOST", "am-1"),
        ("SCHEDULER_APP_PORT", "4040"),
        ("SCHEDULER_REUSE_ENABLED", "false"),
        ("SCHEDULER_MATCHER", "identity"),
        ("SCHEDULER_CALLBACK_WORKERS", " 3 "),
        ("SCHEDULER_IDLE_RELEASE_TIMEOUT_MS", "15000"),
        ("SCHEDULER_RELEASE_COMPLETION_TIMEOUT_MS", "45000"),
    ]))
    .unwrap();
    assert_eq!(cfg.app_host, "am-1");
    assert_eq!(cfg.app_port, 4040);
    assert!(!cfg.reuse_enabled);
    assert!(cfg.preemption_enabled);
    assert_eq!(cfg.matcher, MatcherKind::Identity);
    assert_eq!(cfg.dispatcher.workers, 3);
    assert_eq!(cfg.idle_release_timeout_ms, Some(15_000));
    assert_eq!(cfg.release_completion_timeout_ms, 45_000);
}

#[test]
fn test_from_lookup_reports_bad_values() {
    let err = SchedulerConfig::from_lookup(lookup(&[("SCHEDULER_APP_PORT", "http")])).unwrap_err();
    assert!(err.starts_with("SCHEDULER_APP_PORT"));

    let err = SchedulerConfig::from_lookup(lookup(&[("SCHEDULER_MATCHER", "fuzzy")])).unwrap_err();
    assert!(err.contains("unknown matcher `fuzzy`"));

    let err =
        SchedulerConfig::from_lookup(lookup(&[("SCHEDULER_CALLBACK_QUEUE_DEPTH", "0")])).unwrap_err();
    assert!(err.contains("queue_depth"));
}

#[test]
fn test_matcher_kind_from_str() {
    assert_eq!("always_match".parse::<MatcherKind>(), Ok(MatcherKind::AlwaysMatch));
    assert_eq!(" identity ".parse::<MatcherKind>(), Ok(MatcherKind::Identity));
    assert!("Identity".parse::<MatcherKind>().is_err());
}
