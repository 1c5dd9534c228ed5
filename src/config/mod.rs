//! Configuration models for the scheduler and its callback dispatcher.

pub mod dispatcher;
pub mod scheduler;

pub use dispatcher::DispatcherConfig;
pub use scheduler::{MatcherKind, SchedulerConfig};
