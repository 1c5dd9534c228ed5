//! Core scheduling: matching, bookkeeping, preemption, callback dispatch and
//! the scheduler that ties them together.

pub mod audit;
pub mod callback;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod matcher;
pub mod preemption;
pub mod scheduler;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use callback::{AppCallbackDispatcher, AppFinalStatus, TaskSchedulerAppCallback};
pub use dispatcher::{CallbackDispatcher, DispatcherStats, PanicHook};
pub use error::{AppResult, DispatchError, LedgerError, MatchError, SchedulerError};
pub use ledger::{
    AllocatedContainer, Assignment, ContainerRequest, CookieStatus, HeldContainer, Locality,
    LocalityTier, RequestLedger, RequestState, TaskRequest,
};
pub use matcher::{
    AlwaysMatchesMatcher, ContainerSignature, ContainerSignatureMatcher, IdentityMatcher,
    LaunchContextMatcher, LaunchSpec,
};
pub use preemption::{pick_idle_container, plan_preemption, plan_preemption_within, PreemptionPlan};
pub use scheduler::{SchedulerSnapshot, TaskScheduler};
