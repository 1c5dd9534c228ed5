//! Error types for scheduler operations.

use std::fmt;

use thiserror::Error;

use crate::core::ledger::RequestState;
use crate::util::serde::{ContainerId, Cookie, Resource};

/// Errors produced by the request ledger. Unknown cookies and containers
/// indicate the cluster and the scheduler disagree about what is outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// No live request owns this cookie.
    #[error("unknown cookie: {0}")]
    UnknownCookie(Cookie),
    /// No held container has this id.
    #[error("unknown container: {0}")]
    UnknownContainer(ContainerId),
    /// The request already has a container.
    #[error("{cookie} is already allocated to {container}")]
    AlreadyAllocated {
        /// Request that was already satisfied.
        cookie: Cookie,
        /// Container it holds.
        container: ContainerId,
    },
    /// The container id is already in the held set.
    #[error("container {0} is already held")]
    DuplicateContainer(ContainerId),
    /// The container is not idle and cannot be handed to another request.
    #[error("container {0} is not idle")]
    NotIdle(ContainerId),
    /// No task is running in the container.
    #[error("container {0} is not running a task")]
    NotActive(ContainerId),
    /// The container was already returned to the cluster.
    #[error("container {0} was already released")]
    AlreadyReleased(ContainerId),
    /// The request cannot move from its current state to the requested one.
    #[error("{cookie} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        /// Request being moved.
        cookie: Cookie,
        /// Current state.
        from: RequestState,
        /// Requested state.
        to: RequestState,
    },
}

/// Errors produced by a container signature matcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// One of the signatures was absent.
    #[error("invalid matcher input: {argument} signature is absent")]
    MissingSignature {
        /// Which argument was absent (`candidate`/`required` or `left`/`right`).
        argument: &'static str,
    },
}

/// Errors that can occur when dispatching application callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The callback queue stayed full for the whole enqueue timeout.
    QueueFull,

    /// A blocking call did not produce a result in time.
    Timeout,

    /// `drain` hit its deadline with invocations still outstanding.
    DrainTimeout {
        /// Invocations dispatched before the drain that had not completed.
        pending: u64,
    },

    /// The callback panicked before producing a result.
    CallbackPanicked(String),

    /// The dispatcher has been shut down.
    Shutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (thread spawn failure, channel closed, etc.).
    Internal(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "callback queue is full"),
            Self::Timeout => write!(f, "callback timed out"),
            Self::DrainTimeout { pending } => {
                write!(f, "timed out while draining callbacks: {pending} still pending")
            }
            Self::CallbackPanicked(name) => write!(f, "callback `{name}` panicked"),
            Self::Shutdown => write!(f, "dispatcher has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Errors produced by the task scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Ledger bookkeeping failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The matcher rejected its input.
    #[error(transparent)]
    Match(#[from] MatchError),
    /// Callback dispatch failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Registration with the cluster manager failed.
    #[error("registration failed: {0}")]
    Registration(anyhow::Error),
    /// Unregistration from the cluster manager failed.
    #[error("unregistration failed: {0}")]
    Unregistration(anyhow::Error),
    /// The request asks for more than the cluster will ever grant.
    #[error("requested {requested} exceeds maximum container capability {max}")]
    CapabilityExceeded {
        /// Requested capability.
        requested: Resource,
        /// Registered maximum.
        max: Resource,
    },
    /// The scheduler was configured incorrectly.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The scheduler has been stopped.
    #[error("scheduler is stopped")]
    Stopped,
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
