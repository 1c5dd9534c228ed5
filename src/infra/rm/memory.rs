//! In-memory resource-manager client for tests and local runs.

use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{RegistrationResponse, ResourceManagerClient};
use crate::core::ledger::ContainerRequest;
use crate::core::AppResult;
use crate::util::serde::{ApplicationAccessType, ContainerId, Cookie, FinalApplicationStatus, Resource};

/// A recorded outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RmCall {
    /// `register_application_master`.
    Register {
        /// Advertised host.
        host: String,
        /// Advertised port.
        port: u16,
        /// Advertised tracking URL.
        tracking_url: String,
    },
    /// `add_container_request`.
    AddContainerRequest(ContainerRequest),
    /// `remove_container_request`.
    RemoveContainerRequest(Cookie),
    /// `release_assigned_container`.
    ReleaseAssignedContainer(ContainerId),
    /// `unregister_application_master`.
    Unregister {
        /// Final status.
        status: FinalApplicationStatus,
        /// Diagnostics.
        message: String,
        /// Tracking URL.
        tracking_url: String,
    },
}

#[derive(Debug, Default)]
struct ClientState {
    calls: Vec<RmCall>,
    outstanding: BTreeMap<Cookie, Vec<ContainerRequest>>,
    headroom: Option<Resource>,
    registered: bool,
    fail_registration: Option<String>,
}

/// Records every call and keeps the set of outstanding container requests.
/// Allocations are not simulated; tests feed them to the scheduler.
#[derive(Debug)]
pub struct InMemoryRmClient {
    max_capability: Resource,
    state: Mutex<ClientState>,
}

impl InMemoryRmClient {
    /// A client whose cluster grants containers up to `max_capability`.
    #[must_use]
    pub fn new(max_capability: Resource) -> Self {
        Self {
            max_capability,
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Report `headroom` as the cluster's available resources.
    pub fn set_available_resources(&self, headroom: Option<Resource>) {
        self.state.lock().headroom = headroom;
    }

    /// Make the next registrations fail with `message`.
    pub fn fail_registration(&self, message: impl Into<String>) {
        self.state.lock().fail_registration = Some(message.into());
    }

    /// All calls so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RmCall> {
        self.state.lock().calls.clone()
    }

    /// Forget recorded calls; outstanding requests are kept.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Cookies with container requests outstanding.
    #[must_use]
    pub fn outstanding_cookies(&self) -> Vec<Cookie> {
        self.state.lock().outstanding.keys().copied().collect()
    }

    /// Outstanding container requests for `cookie`.
    #[must_use]
    pub fn outstanding_requests(&self, cookie: Cookie) -> Vec<ContainerRequest> {
        self.state
            .lock()
            .outstanding
            .get(&cookie)
            .cloned()
            .unwrap_or_default()
    }

    /// Containers released so far, in order.
    #[must_use]
    pub fn released_containers(&self) -> Vec<ContainerId> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RmCall::ReleaseAssignedContainer(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// True between registration and unregistration.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.state.lock().registered
    }
}

impl ResourceManagerClient for InMemoryRmClient {
    fn register_application_master(
        &self,
        host: &str,
        port: u16,
        tracking_url: &str,
    ) -> AppResult<RegistrationResponse> {
        let mut state = self.state.lock();
        state.calls.push(RmCall::Register {
            host: host.to_string(),
            port,
            tracking_url: tracking_url.to_string(),
        });
        if let Some(message) = state.fail_registration.clone() {
            return Err(anyhow!(message));
        }
        state.registered = true;

        let acls = HashMap::from([
            (ApplicationAccessType::ViewApp, "*".to_string()),
            (ApplicationAccessType::ModifyApp, "*".to_string()),
        ]);
        Ok(RegistrationResponse {
            max_capability: self.max_capability,
            acls,
            client_to_am_token_key: Uuid::new_v4().as_bytes().to_vec(),
        })
    }

    fn add_container_request(&self, request: &ContainerRequest) {
        let mut state = self.state.lock();
        state.calls.push(RmCall::AddContainerRequest(request.clone()));
        state
            .outstanding
            .entry(request.cookie)
            .or_default()
            .push(request.clone());
    }

    fn remove_container_request(&self, cookie: Cookie) {
        let mut state = self.state.lock();
        state.calls.push(RmCall::RemoveContainerRequest(cookie));
        state.outstanding.remove(&cookie);
    }

    fn release_assigned_container(&self, container_id: &ContainerId) {
        self.state
            .lock()
            .calls
            .push(RmCall::ReleaseAssignedContainer(container_id.clone()));
    }

    fn unregister_application_master(
        &self,
        status: FinalApplicationStatus,
        message: &str,
        tracking_url: &str,
    ) -> AppResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RmCall::Unregister {
            status,
            message: message.to_string(),
            tracking_url: tracking_url.to_string(),
        });
        if !state.registered {
            return Err(anyhow!("application master is not registered"));
        }
        state.registered = false;
        Ok(())
    }

    fn available_resources(&self) -> Option<Resource> {
        self.state.lock().headroom
    }
}
