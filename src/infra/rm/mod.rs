//! The resource-manager protocol client boundary.
//!
//! Wire-level RPC lives outside this crate. The scheduler only needs the
//! calls below; an implementation turns them into protocol messages and feeds
//! the cluster's answers back as [`crate::infra::RmEvent`]s.

pub mod memory;

use std::collections::HashMap;

use crate::core::ledger::ContainerRequest;
use crate::core::AppResult;
use crate::util::serde::{ApplicationAccessType, ContainerId, Cookie, FinalApplicationStatus, Resource};

pub use memory::{InMemoryRmClient, RmCall};

/// What the cluster answers on registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationResponse {
    /// Largest container the cluster will grant.
    pub max_capability: Resource,
    /// Access control lists for the application.
    pub acls: HashMap<ApplicationAccessType, String>,
    /// Secret shared with clients of the application master.
    pub client_to_am_token_key: Vec<u8>,
}

/// Outbound calls to the cluster resource manager.
///
/// Request and release calls are fire-and-forget: implementations queue them
/// for the next heartbeat and must not block on the network.
pub trait ResourceManagerClient: Send + Sync {
    /// Register the application master.
    ///
    /// # Errors
    ///
    /// Protocol or transport failure.
    fn register_application_master(
        &self,
        host: &str,
        port: u16,
        tracking_url: &str,
    ) -> AppResult<RegistrationResponse>;

    /// Ask for a container.
    fn add_container_request(&self, request: &ContainerRequest);

    /// Withdraw every container request tagged with `cookie`.
    fn remove_container_request(&self, cookie: Cookie);

    /// Give a container back.
    fn release_assigned_container(&self, container_id: &ContainerId);

    /// Unregister with a final status.
    ///
    /// # Errors
    ///
    /// Protocol or transport failure.
    fn unregister_application_master(
        &self,
        status: FinalApplicationStatus,
        message: &str,
        tracking_url: &str,
    ) -> AppResult<()>;

    /// Resources the cluster can still grant, from the last heartbeat.
    /// `None` when unknown, which disables preemption.
    fn available_resources(&self) -> Option<Resource> {
        None
    }
}
