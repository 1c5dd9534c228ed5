//! Serializable value types shared by the ledger, the scheduler and the
//! resource-manager boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a logical task owned by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task_{}", self.0)
    }
}

/// Correlation token binding one task request to the cluster requests issued
/// for it. Issued from a monotonically increasing counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cookie(pub u64);

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cookie_{}", self.0)
    }
}

/// Cluster-assigned container identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub String);

impl ContainerId {
    /// Build an identifier from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host and port of a cluster node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Host name.
    pub host: String,
    /// Node manager port.
    pub port: u16,
}

impl NodeId {
    /// Create a node identifier.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Request priority. Follows the cluster-manager convention: a smaller value
/// is more important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl Priority {
    /// True when `self` must be served before `other`.
    #[must_use]
    pub const fn outranks(self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Memory and virtual-core allotment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// Memory in megabytes.
    pub memory_mb: u64,
    /// Virtual cores.
    pub vcores: u32,
}

impl Resource {
    /// The empty allotment.
    pub const ZERO: Self = Self {
        memory_mb: 0,
        vcores: 0,
    };

    /// Create a resource allotment.
    #[must_use]
    pub const fn new(memory_mb: u64, vcores: u32) -> Self {
        Self { memory_mb, vcores }
    }

    /// True when both components are zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.memory_mb == 0 && self.vcores == 0
    }

    /// True when every component of `self` is at least the one in `other`.
    #[must_use]
    pub const fn covers(&self, other: &Self) -> bool {
        self.memory_mb >= other.memory_mb && self.vcores >= other.vcores
    }

    /// Component-wise sum, saturating at the numeric bounds.
    #[must_use]
    pub const fn saturating_add(&self, other: &Self) -> Self {
        Self {
            memory_mb: self.memory_mb.saturating_add(other.memory_mb),
            vcores: self.vcores.saturating_add(other.vcores),
        }
    }

    /// Component-wise difference, floored at zero.
    #[must_use]
    pub const fn saturating_sub(&self, other: &Self) -> Self {
        Self {
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            vcores: self.vcores.saturating_sub(other.vcores),
        }
    }

    /// How much larger `self` is than `required`, as an orderable key
    /// (memory first, then vcores). Components where `self` is smaller count
    /// as zero slack.
    #[must_use]
    pub const fn slack_over(&self, required: &Self) -> (u64, u32) {
        let diff = self.saturating_sub(required);
        (diff.memory_mb, diff.vcores)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<memory:{}MB, vcores:{}>", self.memory_mb, self.vcores)
    }
}

/// Health state of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// New node, not yet running.
    New,
    /// Running and accepting containers.
    Running,
    /// Reported unhealthy.
    Unhealthy,
    /// Decommissioned by the operator.
    Decommissioned,
    /// Lost contact with the cluster manager.
    Lost,
    /// Rebooted.
    Rebooted,
}

/// Node status update delivered by the cluster manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    /// Node identifier.
    pub node_id: NodeId,
    /// Rack the node lives in.
    pub rack: String,
    /// Node state.
    pub state: NodeState,
    /// Total capability of the node.
    pub capability: Resource,
    /// Resources in use on the node.
    pub used: Resource,
    /// Free-form health report.
    pub health_report: String,
}

/// Lifecycle state of a container as reported by the cluster manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Created, not yet running.
    New,
    /// Running.
    Running,
    /// Finished, successfully or not.
    Complete,
}

/// Completion status of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// The container this status describes.
    pub container_id: ContainerId,
    /// Reported state.
    pub state: ContainerState,
    /// Process exit status, `0` on success.
    pub exit_status: i32,
    /// Diagnostics from the node manager.
    pub diagnostics: String,
}

impl ContainerStatus {
    /// Status for a container that finished with `exit_status`.
    pub fn completed(container_id: ContainerId, exit_status: i32, diagnostics: impl Into<String>) -> Self {
        Self {
            container_id,
            state: ContainerState::Complete,
            exit_status,
            diagnostics: diagnostics.into(),
        }
    }
}

/// Final status reported when the application unregisters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalApplicationStatus {
    /// Status not yet decided.
    Undefined,
    /// Application finished successfully.
    Succeeded,
    /// Application failed.
    Failed,
    /// Application was killed.
    Killed,
}

/// Access-control list category returned on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationAccessType {
    /// May view application state.
    ViewApp,
    /// May modify or kill the application.
    ModifyApp,
}
