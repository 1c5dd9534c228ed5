//! Tests for error types

use container_scheduler::core::{
    DispatchError, LedgerError, MatchError, RequestState, SchedulerError,
};
use container_scheduler::util::serde::{ContainerId, Cookie, Resource};

#[test]
fn test_ledger_error_display() {
    assert_eq!(
        LedgerError::UnknownContainer(ContainerId::new("c9")).to_string(),
        "unknown container: c9"
    );
    assert_eq!(
        LedgerError::AlreadyAllocated {
            cookie: Cookie(2),
            container: ContainerId::new("c1"),
        }
        .to_string(),
        "cookie_2 is already allocated to c1"
    );
    assert_eq!(
        LedgerError::InvalidTransition {
            cookie: Cookie(4),
            from: RequestState::Released,
            to: RequestState::Allocated,
        }
        .to_string(),
        "cookie_4 cannot move from Released to Allocated"
    );
}

#[test]
fn test_match_error_display() {
    let err = MatchError::MissingSignature {
        argument: "candidate",
    };
    assert_eq!(
        err.to_string(),
        "invalid matcher input: candidate signature is absent"
    );
}

#[test]
fn test_dispatch_error_display() {
    assert_eq!(DispatchError::Timeout.to_string(), "callback timed out");
    assert_eq!(
        DispatchError::Shutdown.to_string(),
        "dispatcher has been shut down"
    );
    assert_eq!(
        DispatchError::InvalidConfig("workers must be greater than 0".into()).to_string(),
        "invalid configuration: workers must be greater than 0"
    );
}

#[test]
fn test_capability_exceeded_display() {
    let err = SchedulerError::CapabilityExceeded {
        requested: Resource::new(16384, 2),
        max: Resource::new(8192, 8),
    };
    assert_eq!(
        err.to_string(),
        "requested <memory:16384MB, vcores:2> exceeds maximum container capability <memory:8192MB, vcores:8>"
    );
}

#[test]
fn test_scheduler_error_conversions() {
    let err: SchedulerError = DispatchError::QueueFull.into();
    assert!(matches!(err, SchedulerError::Dispatch(DispatchError::QueueFull)));
    assert_eq!(err.to_string(), "callback queue is full");

    let err: SchedulerError = MatchError::MissingSignature { argument: "left" }.into();
    assert!(matches!(err, SchedulerError::Match(_)));

    let err = SchedulerError::Registration(anyhow::anyhow!("connection refused"));
    assert_eq!(err.to_string(), "registration failed: connection refused");
    assert_eq!(SchedulerError::Stopped.to_string(), "scheduler is stopped");
}
