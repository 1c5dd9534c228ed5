//! Request ledger: outstanding task requests keyed by cookie, and the held
//! container set keyed by container id.
//!
//! The ledger is plain data with no I/O and no locking of its own; the
//! scheduler keeps it behind its single state lock, which is what makes the
//! request path and the cluster-callback path safe against each other.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::matcher::ContainerSignature;
use crate::core::LedgerError;
use crate::util::clock::now_ms;
use crate::util::serde::{ContainerId, Cookie, NodeId, Priority, Resource, TaskId};

/// Placement hints for a task request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locality {
    /// Preferred hosts.
    pub nodes: Vec<String>,
    /// Preferred racks.
    pub racks: Vec<String>,
    /// Whether the cluster may place the container anywhere once the
    /// preferred locations are exhausted.
    pub relax_locality: bool,
}

impl Default for Locality {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            racks: Vec::new(),
            relax_locality: true,
        }
    }
}

/// A logical unit of work asking for a container.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Owning task.
    pub task: TaskId,
    /// Resources the task needs.
    pub capability: Resource,
    /// Scheduling priority.
    pub priority: Priority,
    /// Placement hints.
    pub locality: Locality,
    /// Launch requirements, used for reuse and preemption matching.
    pub signature: ContainerSignature,
}

impl TaskRequest {
    /// A request with no locality preference.
    #[must_use]
    pub fn new(
        task: TaskId,
        capability: Resource,
        priority: Priority,
        signature: ContainerSignature,
    ) -> Self {
        Self {
            task,
            capability,
            priority,
            locality: Locality::default(),
            signature,
        }
    }

    /// Prefer the given hosts.
    #[must_use]
    pub fn on_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locality.nodes = nodes.into_iter().map(Into::into).collect();
        self
    }

    /// Prefer the given racks.
    #[must_use]
    pub fn on_racks<I, S>(mut self, racks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locality.racks = racks.into_iter().map(Into::into).collect();
        self
    }

    /// Forbid placement outside the preferred locations.
    #[must_use]
    pub fn strict_locality(mut self) -> Self {
        self.locality.relax_locality = false;
        self
    }
}

/// One locality tier of a cluster request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalityTier {
    /// A specific host.
    Node(String),
    /// Any host in a rack.
    Rack(String),
    /// Anywhere in the cluster.
    Any,
}

/// Cluster-facing request submitted to the resource-manager client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRequest {
    /// Correlation cookie of the owning task request.
    pub cookie: Cookie,
    /// Priority.
    pub priority: Priority,
    /// Requested capability.
    pub capability: Resource,
    /// Where the container may be placed.
    pub tier: LocalityTier,
}

impl ContainerRequest {
    /// Expand a task request into its locality tiers: one per preferred node,
    /// one per preferred rack, and an `Any` tier when locality is relaxed or
    /// no hints were given.
    #[must_use]
    pub fn tiers_for(cookie: Cookie, request: &TaskRequest) -> Vec<Self> {
        let make = |tier| Self {
            cookie,
            priority: request.priority,
            capability: request.capability,
            tier,
        };
        let locality = &request.locality;
        let mut tiers: Vec<Self> = locality
            .nodes
            .iter()
            .map(|n| make(LocalityTier::Node(n.clone())))
            .chain(locality.racks.iter().map(|r| make(LocalityTier::Rack(r.clone()))))
            .collect();
        if locality.relax_locality || tiers.is_empty() {
            tiers.push(make(LocalityTier::Any));
        }
        tiers
    }
}

/// A container granted by the cluster.
#[derive(Debug, Clone)]
pub struct AllocatedContainer {
    /// Container id.
    pub id: ContainerId,
    /// Node the container runs on.
    pub node: NodeId,
    /// Rack of the node, when known.
    pub rack: Option<String>,
    /// Granted allotment.
    pub resource: Resource,
    /// Priority of the request it was granted for.
    pub priority: Priority,
    /// Originating cookie, when the protocol client resolved it.
    pub cookie: Option<Cookie>,
    /// Launch signature; absent until the first task is assigned.
    pub signature: Option<ContainerSignature>,
}

impl AllocatedContainer {
    /// A freshly granted container with no cookie and no signature.
    #[must_use]
    pub const fn new(id: ContainerId, node: NodeId, resource: Resource, priority: Priority) -> Self {
        Self {
            id,
            node,
            rack: None,
            resource,
            priority,
            cookie: None,
            signature: None,
        }
    }

    /// Attach the cookie the protocol client resolved.
    #[must_use]
    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookie = Some(cookie);
        self
    }

    /// Attach the rack of the node.
    #[must_use]
    pub fn on_rack(mut self, rack: impl Into<String>) -> Self {
        self.rack = Some(rack.into());
        self
    }

    /// Attach a launch signature.
    #[must_use]
    pub fn with_signature(mut self, signature: ContainerSignature) -> Self {
        self.signature = Some(signature);
        self
    }
}

/// Lifecycle of a task request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Recorded, nothing sent to the cluster yet.
    Pending,
    /// Cluster requests issued.
    Requested,
    /// A container is assigned.
    Allocated,
    /// The container is being taken away.
    Releasing,
    /// The container finished (terminal).
    Completed,
    /// The request was withdrawn or its container released (terminal).
    Released,
}

impl RequestState {
    /// True for `Pending` and `Requested`.
    #[must_use]
    pub const fn is_outstanding(self) -> bool {
        matches!(self, Self::Pending | Self::Requested)
    }
}

/// What a held container is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// Running work for a live request.
    Active {
        /// Owning request.
        cookie: Cookie,
    },
    /// Retained for reuse.
    Idle {
        /// When it became idle.
        since_ms: u128,
    },
    /// The owning task was told to give the container up; waiting for the
    /// application to acknowledge.
    BeingReleased {
        /// Owning request.
        cookie: Cookie,
    },
    /// Returned to the cluster; waiting for its completion notification.
    Released {
        /// Last task that ran in it.
        task: Option<TaskId>,
    },
}

/// A member of the held container set.
#[derive(Debug, Clone)]
pub struct HeldContainer {
    /// The container; its signature is always set once held.
    pub container: AllocatedContainer,
    /// Signature the container was launched with.
    pub signature: ContainerSignature,
    /// Current assignment.
    pub assignment: Assignment,
    /// When the current or most recent assignment started.
    pub assigned_at_ms: u128,
    /// Last task that ran in it.
    pub last_task: Option<TaskId>,
}

impl HeldContainer {
    /// True when the container is retained for reuse.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.assignment, Assignment::Idle { .. })
    }

    /// Cookie of the request running in the container, if any.
    #[must_use]
    pub const fn active_cookie(&self) -> Option<Cookie> {
        match self.assignment {
            Assignment::Active { cookie } => Some(cookie),
            _ => None,
        }
    }

    /// True once the container has been marked for release or released.
    #[must_use]
    pub const fn is_leaving(&self) -> bool {
        matches!(
            self.assignment,
            Assignment::BeingReleased { .. } | Assignment::Released { .. }
        )
    }
}

/// Classification of a cookie that may or may not still be live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieStatus {
    /// Owned by a live request in the given state.
    Live(RequestState),
    /// Issued earlier, since cancelled or finished.
    Retired,
    /// Never issued by this ledger.
    Unknown,
}

/// Result of [`RequestLedger::remove_request`].
#[derive(Debug, Clone)]
pub struct RemovedRequest {
    /// Cookie of the removed request.
    pub cookie: Cookie,
    /// The request itself.
    pub request: TaskRequest,
    /// State it was in.
    pub previous_state: RequestState,
    /// Container moved to the idle pool, if the request held one.
    pub idled_container: Option<ContainerId>,
}

/// Result of [`RequestLedger::record_completion`].
#[derive(Debug, Clone)]
pub struct CompletedContainer {
    /// The finished container.
    pub container: AllocatedContainer,
    /// Task it was running or last ran, `None` for an idle container.
    pub task: Option<TaskId>,
    /// Cookie of the request it was serving, if still live.
    pub cookie: Option<Cookie>,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    request: TaskRequest,
    state: RequestState,
    container: Option<ContainerId>,
    cluster_requests: Vec<ContainerRequest>,
}

/// Bookkeeping for outstanding requests and held containers.
#[derive(Debug)]
pub struct RequestLedger {
    next_cookie: u64,
    entries: BTreeMap<Cookie, LedgerEntry>,
    held: BTreeMap<ContainerId, HeldContainer>,
}

impl Default for RequestLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLedger {
    /// Create an empty ledger. Cookies start at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_cookie: 1,
            entries: BTreeMap::new(),
            held: BTreeMap::new(),
        }
    }

    /// Record a new request in `Pending` and issue its cookie.
    pub fn add_request(&mut self, request: TaskRequest) -> Cookie {
        let cookie = Cookie(self.next_cookie);
        self.next_cookie += 1;
        self.entries.insert(
            cookie,
            LedgerEntry {
                request,
                state: RequestState::Pending,
                container: None,
                cluster_requests: Vec::new(),
            },
        );
        cookie
    }

    /// Move a `Pending` request to `Requested`, remembering what was sent.
    ///
    /// # Errors
    ///
    /// `UnknownCookie`, or `InvalidTransition` when the request is not pending.
    pub fn mark_requested(
        &mut self,
        cookie: Cookie,
        cluster_requests: Vec<ContainerRequest>,
    ) -> Result<(), LedgerError> {
        let entry = self
            .entries
            .get_mut(&cookie)
            .ok_or(LedgerError::UnknownCookie(cookie))?;
        if entry.state != RequestState::Pending {
            return Err(LedgerError::InvalidTransition {
                cookie,
                from: entry.state,
                to: RequestState::Requested,
            });
        }
        entry.state = RequestState::Requested;
        entry.cluster_requests = cluster_requests;
        Ok(())
    }

    /// Remove a request. A container it held goes back to the idle pool;
    /// a container already being released keeps its release in progress.
    ///
    /// # Errors
    ///
    /// `UnknownCookie` if no live request owns `cookie`.
    pub fn remove_request(&mut self, cookie: Cookie) -> Result<RemovedRequest, LedgerError> {
        let entry = self
            .entries
            .remove(&cookie)
            .ok_or(LedgerError::UnknownCookie(cookie))?;

        let mut idled_container = None;
        if let Some(id) = entry.container.as_ref() {
            if let Some(held) = self.held.get_mut(id) {
                match held.assignment {
                    Assignment::Active { .. } => {
                        held.assignment = Assignment::Idle { since_ms: now_ms() };
                        idled_container = Some(id.clone());
                    }
                    Assignment::BeingReleased { .. } => {
                        held.assignment = Assignment::Released {
                            task: Some(entry.request.task),
                        };
                    }
                    Assignment::Idle { .. } | Assignment::Released { .. } => {}
                }
            }
        }

        Ok(RemovedRequest {
            cookie,
            request: entry.request,
            previous_state: entry.state,
            idled_container,
        })
    }

    /// Look up the live request that owns `cookie`.
    ///
    /// # Errors
    ///
    /// `UnknownCookie` if the cookie is not live.
    pub fn lookup_by_cookie(&self, cookie: Cookie) -> Result<&TaskRequest, LedgerError> {
        self.entries
            .get(&cookie)
            .map(|e| &e.request)
            .ok_or(LedgerError::UnknownCookie(cookie))
    }

    /// Current state of a live request.
    #[must_use]
    pub fn state_of(&self, cookie: Cookie) -> Option<RequestState> {
        self.entries.get(&cookie).map(|e| e.state)
    }

    /// Container assigned to a live request.
    #[must_use]
    pub fn container_of(&self, cookie: Cookie) -> Option<&ContainerId> {
        self.entries.get(&cookie).and_then(|e| e.container.as_ref())
    }

    /// Cluster requests issued for a live request.
    #[must_use]
    pub fn cluster_requests_of(&self, cookie: Cookie) -> &[ContainerRequest] {
        self.entries
            .get(&cookie)
            .map_or(&[], |e| e.cluster_requests.as_slice())
    }

    /// Tell live, retired and never-issued cookies apart.
    #[must_use]
    pub fn classify_cookie(&self, cookie: Cookie) -> CookieStatus {
        match self.entries.get(&cookie) {
            Some(entry) => CookieStatus::Live(entry.state),
            None if cookie.0 > 0 && cookie.0 < self.next_cookie => CookieStatus::Retired,
            None => CookieStatus::Unknown,
        }
    }

    /// Assign a freshly allocated container to an outstanding request.
    ///
    /// The container's signature defaults to the request's when the cluster
    /// did not report one. Returns the state the request was in.
    ///
    /// # Errors
    ///
    /// `UnknownCookie`; `AlreadyAllocated` if the request already holds a
    /// container; `DuplicateContainer` if the container is already held.
    pub fn record_allocation(
        &mut self,
        cookie: Cookie,
        mut container: AllocatedContainer,
    ) -> Result<RequestState, LedgerError> {
        if self.held.contains_key(&container.id) {
            return Err(LedgerError::DuplicateContainer(container.id));
        }
        let entry = self
            .entries
            .get_mut(&cookie)
            .ok_or(LedgerError::UnknownCookie(cookie))?;
        if let Some(existing) = entry.container.as_ref() {
            return Err(LedgerError::AlreadyAllocated {
                cookie,
                container: existing.clone(),
            });
        }
        if !entry.state.is_outstanding() {
            return Err(LedgerError::InvalidTransition {
                cookie,
                from: entry.state,
                to: RequestState::Allocated,
            });
        }

        let previous = entry.state;
        let signature = container
            .signature
            .get_or_insert_with(|| entry.request.signature.clone())
            .clone();
        container.cookie = Some(cookie);
        entry.state = RequestState::Allocated;
        entry.container = Some(container.id.clone());
        entry.cluster_requests.clear();

        self.held.insert(
            container.id.clone(),
            HeldContainer {
                container,
                signature,
                assignment: Assignment::Active { cookie },
                assigned_at_ms: now_ms(),
                last_task: Some(entry.request.task),
            },
        );
        Ok(previous)
    }

    /// Hand an idle container to an outstanding request. Returns the
    /// container and the state the request was in.
    ///
    /// # Errors
    ///
    /// `UnknownContainer`, `NotIdle`, `UnknownCookie`, `AlreadyAllocated`.
    pub fn assign_idle(
        &mut self,
        cookie: Cookie,
        container_id: &ContainerId,
    ) -> Result<(AllocatedContainer, RequestState), LedgerError> {
        let held = self
            .held
            .get_mut(container_id)
            .ok_or_else(|| LedgerError::UnknownContainer(container_id.clone()))?;
        if !held.is_idle() {
            return Err(LedgerError::NotIdle(container_id.clone()));
        }
        let entry = self
            .entries
            .get_mut(&cookie)
            .ok_or(LedgerError::UnknownCookie(cookie))?;
        if let Some(existing) = entry.container.as_ref() {
            return Err(LedgerError::AlreadyAllocated {
                cookie,
                container: existing.clone(),
            });
        }

        let previous = entry.state;
        entry.state = RequestState::Allocated;
        entry.container = Some(container_id.clone());
        entry.cluster_requests.clear();

        held.assignment = Assignment::Active { cookie };
        held.assigned_at_ms = now_ms();
        held.last_task = Some(entry.request.task);
        held.container.cookie = Some(cookie);
        Ok((held.container.clone(), previous))
    }

    /// Mark an active container as being taken from its task. Returns the
    /// cookie of the task that must be told.
    ///
    /// # Errors
    ///
    /// `UnknownContainer`, or `NotActive` when no task runs in it.
    pub fn begin_release(&mut self, container_id: &ContainerId) -> Result<Cookie, LedgerError> {
        let held = self
            .held
            .get_mut(container_id)
            .ok_or_else(|| LedgerError::UnknownContainer(container_id.clone()))?;
        let Assignment::Active { cookie } = held.assignment else {
            return Err(LedgerError::NotActive(container_id.clone()));
        };
        held.assignment = Assignment::BeingReleased { cookie };
        if let Some(entry) = self.entries.get_mut(&cookie) {
            entry.state = RequestState::Releasing;
        }
        Ok(cookie)
    }

    /// Mark a held container as returned to the cluster. A request it was
    /// serving becomes terminal and is removed. Returns the task that last
    /// ran in it.
    ///
    /// # Errors
    ///
    /// `UnknownContainer`, or `AlreadyReleased` on a second release.
    pub fn release_container(
        &mut self,
        container_id: &ContainerId,
    ) -> Result<Option<TaskId>, LedgerError> {
        let held = self
            .held
            .get_mut(container_id)
            .ok_or_else(|| LedgerError::UnknownContainer(container_id.clone()))?;
        let task = match held.assignment {
            Assignment::Active { cookie } | Assignment::BeingReleased { cookie } => {
                self.entries.remove(&cookie);
                held.last_task
            }
            Assignment::Idle { .. } => None,
            Assignment::Released { .. } => {
                return Err(LedgerError::AlreadyReleased(container_id.clone()));
            }
        };
        held.assignment = Assignment::Released { task };
        Ok(task)
    }

    /// Drop a finished container from the held set. A request it was serving
    /// becomes terminal and is removed.
    ///
    /// # Errors
    ///
    /// `UnknownContainer` if the container is not held.
    pub fn record_completion(
        &mut self,
        container_id: &ContainerId,
    ) -> Result<CompletedContainer, LedgerError> {
        let held = self
            .held
            .remove(container_id)
            .ok_or_else(|| LedgerError::UnknownContainer(container_id.clone()))?;
        let (task, cookie) = match held.assignment {
            Assignment::Active { cookie } | Assignment::BeingReleased { cookie } => {
                let task = self
                    .entries
                    .remove(&cookie)
                    .map(|e| e.request.task)
                    .or(held.last_task);
                (task, Some(cookie))
            }
            Assignment::Released { task } => (task, None),
            Assignment::Idle { .. } => (None, None),
        };
        Ok(CompletedContainer {
            container: held.container,
            task,
            cookie,
        })
    }

    /// Containers retained for reuse.
    #[must_use]
    pub fn idle_containers(&self) -> Vec<&AllocatedContainer> {
        self.held
            .values()
            .filter(|h| h.is_idle())
            .map(|h| &h.container)
            .collect()
    }

    /// The whole held set, ordered by container id.
    pub fn held_containers(&self) -> impl Iterator<Item = &HeldContainer> {
        self.held.values()
    }

    /// A single held container.
    #[must_use]
    pub fn held(&self, container_id: &ContainerId) -> Option<&HeldContainer> {
        self.held.get(container_id)
    }

    /// Outstanding (`Pending`/`Requested`) requests, most important first,
    /// oldest first within a priority.
    #[must_use]
    pub fn outstanding(&self) -> Vec<(Cookie, &TaskRequest)> {
        let mut out: Vec<(Cookie, &TaskRequest)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state.is_outstanding())
            .map(|(c, e)| (*c, &e.request))
            .collect();
        out.sort_by_key(|(c, r)| (r.priority, *c));
        out
    }

    /// Find the outstanding request a container without a cookie was granted
    /// for: same priority, capability covered, node-local before rack-local
    /// before anywhere, oldest cookie first.
    #[must_use]
    pub fn match_outstanding(&self, container: &AllocatedContainer) -> Option<Cookie> {
        let host = container.node.host.as_str();
        let rack = container.rack.as_deref();
        let mut best: Option<(u8, Cookie)> = None;
        for (cookie, entry) in &self.entries {
            if entry.state != RequestState::Requested
                || entry.request.priority != container.priority
                || !container.resource.covers(&entry.request.capability)
            {
                continue;
            }
            let rank = entry
                .cluster_requests
                .iter()
                .filter_map(|req| match &req.tier {
                    LocalityTier::Node(n) if n == host => Some(0),
                    LocalityTier::Rack(r) if Some(r.as_str()) == rack => Some(1),
                    LocalityTier::Any => Some(2),
                    _ => None,
                })
                .min();
            if let Some(rank) = rank {
                let better = match best {
                    Some((b, _)) => rank < b,
                    None => true,
                };
                if better {
                    best = Some((rank, *cookie));
                }
            }
        }
        best.map(|(_, c)| c)
    }

    /// Idle containers whose idle period exceeds `timeout_ms` at `now_ms`.
    #[must_use]
    pub fn expired_idle_containers(&self, now_ms: u128, timeout_ms: u64) -> Vec<ContainerId> {
        self.held
            .values()
            .filter_map(|h| match h.assignment {
                Assignment::Idle { since_ms }
                    if now_ms.saturating_sub(since_ms) >= u128::from(timeout_ms) =>
                {
                    Some(h.container.id.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Capability of all outstanding requests.
    #[must_use]
    pub fn outstanding_resources(&self) -> Resource {
        self.entries
            .values()
            .filter(|e| e.state.is_outstanding())
            .fold(Resource::ZERO, |acc, e| acc.saturating_add(&e.request.capability))
    }

    /// Allotment of containers held and not on their way out.
    #[must_use]
    pub fn held_resources(&self) -> Resource {
        self.held
            .values()
            .filter(|h| !h.is_leaving())
            .fold(Resource::ZERO, |acc, h| acc.saturating_add(&h.container.resource))
    }

    /// Allotment of containers being released or released but not yet
    /// reported complete.
    #[must_use]
    pub fn releasing_resources(&self) -> Resource {
        self.held
            .values()
            .filter(|h| h.is_leaving())
            .fold(Resource::ZERO, |acc, h| acc.saturating_add(&h.container.resource))
    }

    /// Number of live requests in `state`.
    #[must_use]
    pub fn count_in(&self, state: RequestState) -> usize {
        self.entries.values().filter(|e| e.state == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::matcher::LaunchSpec;

    fn request(task: u64, priority: u32) -> TaskRequest {
        TaskRequest::new(
            TaskId(task),
            Resource::new(1024, 1),
            Priority(priority),
            ContainerSignature::new(LaunchSpec::with_resource(Resource::new(1024, 1))),
        )
    }

    fn container(id: &str, priority: u32) -> AllocatedContainer {
        AllocatedContainer::new(
            ContainerId::new(id),
            NodeId::new("host1", 8041),
            Resource::new(1024, 1),
            Priority(priority),
        )
    }

    #[test]
    fn test_lookup_returns_added_request_until_removed() {
        let mut ledger = RequestLedger::new();
        let c1 = ledger.add_request(request(1, 5));
        let c2 = ledger.add_request(request(2, 5));
        assert_ne!(c1, c2);
        assert_eq!(ledger.lookup_by_cookie(c1).unwrap().task, TaskId(1));
        assert_eq!(ledger.state_of(c1), Some(RequestState::Pending));

        ledger.remove_request(c1).unwrap();
        assert_eq!(ledger.lookup_by_cookie(c1).unwrap_err(), LedgerError::UnknownCookie(c1));
        assert_eq!(ledger.classify_cookie(c1), CookieStatus::Retired);
        assert_eq!(ledger.classify_cookie(Cookie(99)), CookieStatus::Unknown);
    }

    #[test]
    fn test_allocation_then_removal_idles_container() {
        let mut ledger = RequestLedger::new();
        let cookie = ledger.add_request(request(1, 5));
        let req = request(1, 5);
        ledger
            .mark_requested(cookie, ContainerRequest::tiers_for(cookie, &req))
            .unwrap();
        ledger.record_allocation(cookie, container("c_1", 5)).unwrap();
        assert_eq!(ledger.state_of(cookie), Some(RequestState::Allocated));
        assert!(ledger.idle_containers().is_empty());

        let removed = ledger.remove_request(cookie).unwrap();
        assert_eq!(removed.previous_state, RequestState::Allocated);
        assert_eq!(removed.idled_container, Some(ContainerId::new("c_1")));
        let idle = ledger.idle_containers();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].id, ContainerId::new("c_1"));
        assert!(idle[0].signature.is_some());
    }

    #[test]
    fn test_second_allocation_for_same_cookie_is_rejected() {
        let mut ledger = RequestLedger::new();
        let cookie = ledger.add_request(request(1, 5));
        ledger.record_allocation(cookie, container("c_1", 5)).unwrap();
        let err = ledger.record_allocation(cookie, container("c_2", 5)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::AlreadyAllocated {
                cookie,
                container: ContainerId::new("c_1")
            }
        );
    }

    #[test]
    fn test_unknown_completion_is_an_error() {
        let mut ledger = RequestLedger::new();
        let err = ledger.record_completion(&ContainerId::new("ghost")).unwrap_err();
        assert_eq!(err, LedgerError::UnknownContainer(ContainerId::new("ghost")));
    }

    #[test]
    fn test_completion_of_idle_container_has_no_task() {
        let mut ledger = RequestLedger::new();
        let cookie = ledger.add_request(request(1, 5));
        ledger.record_allocation(cookie, container("c_1", 5)).unwrap();
        ledger.remove_request(cookie).unwrap();

        let done = ledger.record_completion(&ContainerId::new("c_1")).unwrap();
        assert_eq!(done.task, None);
        assert_eq!(done.cookie, None);
    }

    #[test]
    fn test_completion_of_active_container_retires_request() {
        let mut ledger = RequestLedger::new();
        let cookie = ledger.add_request(request(7, 5));
        ledger.record_allocation(cookie, container("c_1", 5)).unwrap();

        let done = ledger.record_completion(&ContainerId::new("c_1")).unwrap();
        assert_eq!(done.task, Some(TaskId(7)));
        assert_eq!(done.cookie, Some(cookie));
        assert_eq!(ledger.classify_cookie(cookie), CookieStatus::Retired);
    }

    #[test]
    fn test_release_is_recorded_once() {
        let mut ledger = RequestLedger::new();
        let cookie = ledger.add_request(request(3, 5));
        ledger.record_allocation(cookie, container("c_1", 5)).unwrap();
        let id = ContainerId::new("c_1");

        assert_eq!(ledger.release_container(&id).unwrap(), Some(TaskId(3)));
        assert_eq!(
            ledger.release_container(&id).unwrap_err(),
            LedgerError::AlreadyReleased(id.clone())
        );
        let done = ledger.record_completion(&id).unwrap();
        assert_eq!(done.task, Some(TaskId(3)));
    }

    #[test]
    fn test_tiers_cover_nodes_racks_and_any() {
        let req = request(1, 5).on_nodes(["h1", "h2"]).on_racks(["/r1"]);
        let tiers = ContainerRequest::tiers_for(Cookie(4), &req);
        let kinds: Vec<_> = tiers.iter().map(|t| t.tier.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                LocalityTier::Node("h1".into()),
                LocalityTier::Node("h2".into()),
                LocalityTier::Rack("/r1".into()),
                LocalityTier::Any,
            ]
        );
        assert!(tiers.iter().all(|t| t.cookie == Cookie(4)));

        let strict = request(1, 5).on_nodes(["h1"]).strict_locality();
        assert_eq!(ContainerRequest::tiers_for(Cookie(5), &strict).len(), 1);
    }

    #[test]
    fn test_match_outstanding_prefers_node_local() {
        let mut ledger = RequestLedger::new();
        let anywhere = ledger.add_request(request(1, 5));
        let local_req = request(2, 5).on_nodes(["host1"]);
        let local = ledger.add_request(local_req.clone());
        for (cookie, req) in [(anywhere, request(1, 5)), (local, local_req)] {
            ledger
                .mark_requested(cookie, ContainerRequest::tiers_for(cookie, &req))
                .unwrap();
        }

        assert_eq!(ledger.match_outstanding(&container("c_1", 5)), Some(local));
        assert_eq!(ledger.match_outstanding(&container("c_2", 9)), None);
    }
}
