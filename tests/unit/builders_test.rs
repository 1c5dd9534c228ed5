//! Tests for builder modules

use std::sync::Arc;

use container_scheduler::builders::{matcher_for, TaskSchedulerBuilder};
use container_scheduler::config::{MatcherKind, SchedulerConfig};
use container_scheduler::core::{ContainerSignature, LaunchSpec, SchedulerError};
use container_scheduler::infra::InMemoryRmClient;
use container_scheduler::util::serde::Resource;

fn sig() -> ContainerSignature {
    ContainerSignature::new(LaunchSpec::with_resource(Resource::new(1024, 1)))
}

#[test]
fn test_matcher_for_selects_policy() {
    let (a, b) = (sig(), sig());

    let always = matcher_for(MatcherKind::AlwaysMatch);
    assert!(always.is_exact_match(Some(&a), Some(&b)).unwrap());

    let identity = matcher_for(MatcherKind::Identity);
    assert!(!identity.is_exact_match(Some(&a), Some(&b)).unwrap());
    assert!(identity.is_exact_match(Some(&a), Some(&a.clone())).unwrap());

    let launch = matcher_for(MatcherKind::LaunchContext);
    assert!(launch.is_exact_match(Some(&a), Some(&b)).unwrap());
    let bigger = ContainerSignature::new(LaunchSpec::with_resource(Resource::new(2048, 1)));
    assert!(!launch.is_super_set(Some(&a), Some(&bigger)).unwrap());
}

#[test]
fn test_builder_requires_client() {
    let err = TaskSchedulerBuilder::new(SchedulerConfig::default())
        .build()
        .unwrap_err();
    match err {
        SchedulerError::Config(msg) => assert!(msg.contains("client")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_builder_requires_app() {
    let err = TaskSchedulerBuilder::new(SchedulerConfig::default())
        .client(Arc::new(InMemoryRmClient::new(Resource::new(4096, 4))))
        .build()
        .unwrap_err();
    match err {
        SchedulerError::Config(msg) => assert!(msg.contains("application")),
        other => panic!("unexpected error {other:?}"),
    }
}
