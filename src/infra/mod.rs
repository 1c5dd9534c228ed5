//! Boundaries to the cluster resource manager.

pub mod events;
pub mod rm;

pub use events::{RmCallbackHandler, RmEvent, SchedulerEventLoop};
pub use rm::{InMemoryRmClient, RegistrationResponse, ResourceManagerClient, RmCall};
