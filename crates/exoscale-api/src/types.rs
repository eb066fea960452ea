//! Domain types returned by the façade.
//!
//! These are the strict, non-nullable shapes the autoscaler works with. The
//! nullable wire models live in [`crate::wire`] and are converted at the
//! façade boundary.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Unique identifier of an instance pool.
pub type PoolId = String;

/// Unique identifier of a compute instance.
pub type InstanceId = String;

/// Unique identifier of an asynchronous operation.
pub type OperationId = String;

// ── Zone ───────────────────────────────────────────────────────────

/// The cloud regional scope. Every call made by one client targets one zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Zone(String);

impl Zone {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Default zone-scoped API endpoint.
    pub fn default_endpoint(&self) -> String {
        format!("https://api-{}.exoscale.com/v2/", self.0)
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Pools ──────────────────────────────────────────────────────────

/// Kind of component managing an instance pool or an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManagerKind {
    SksNodepool,
    InstancePool,
}

impl ManagerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ManagerKind::SksNodepool => "sks-nodepool",
            ManagerKind::InstancePool => "instance-pool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sks-nodepool" => Some(ManagerKind::SksNodepool),
            "instance-pool" => Some(ManagerKind::InstancePool),
            _ => None,
        }
    }
}

impl fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The manager of a resource, as reported by the cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manager {
    pub id: String,
    /// `None` when the cloud reports a manager type this crate does not know.
    pub kind: Option<ManagerKind>,
}

/// Lifecycle state of an instance pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolState {
    Creating,
    Running,
    ScalingUp,
    ScalingDown,
    Updating,
    Suspended,
    Error,
    Destroying,
    Other(String),
}

impl PoolState {
    pub fn parse(s: &str) -> Self {
        match s {
            "creating" => PoolState::Creating,
            "running" => PoolState::Running,
            "scaling-up" => PoolState::ScalingUp,
            "scaling-down" => PoolState::ScalingDown,
            "updating" => PoolState::Updating,
            "suspended" => PoolState::Suspended,
            "error" => PoolState::Error,
            "destroying" => PoolState::Destroying,
            other => PoolState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PoolState::Creating => "creating",
            PoolState::Running => "running",
            PoolState::ScalingUp => "scaling-up",
            PoolState::ScalingDown => "scaling-down",
            PoolState::Updating => "updating",
            PoolState::Suspended => "suspended",
            PoolState::Error => "error",
            PoolState::Destroying => "destroying",
            PoolState::Other(s) => s,
        }
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cloud instance pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub id: PoolId,
    pub name: String,
    pub size: u64,
    pub state: PoolState,
    pub instance_type_id: String,
    /// Members as listed on the pool itself.
    pub instance_ids: Vec<InstanceId>,
    /// Set when the pool is managed by another component (SKS nodepool).
    pub manager: Option<Manager>,
    pub labels: BTreeMap<String, String>,
}

/// How mutations on a pool are routed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolManagerRef {
    /// A bare instance pool, mutated through `/instance-pool/{id}`.
    InstancePool,
    /// An instance pool owned by an SKS nodepool, mutated through
    /// `/sks-cluster/{cluster_id}/nodepool/{nodepool_id}`.
    SksNodepool {
        cluster_id: String,
        nodepool_id: String,
    },
}

/// Opaque reference to the cloud pool backing a node group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolRef {
    /// Instance pool id.
    pub id: PoolId,
    pub manager: PoolManagerRef,
}

impl PoolRef {
    pub fn instance_pool(id: impl Into<PoolId>) -> Self {
        Self {
            id: id.into(),
            manager: PoolManagerRef::InstancePool,
        }
    }

    pub fn sks_nodepool(
        id: impl Into<PoolId>,
        cluster_id: impl Into<String>,
        nodepool_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            manager: PoolManagerRef::SksNodepool {
                cluster_id: cluster_id.into(),
                nodepool_id: nodepool_id.into(),
            },
        }
    }

    pub fn manager_kind(&self) -> ManagerKind {
        match self.manager {
            PoolManagerRef::InstancePool => ManagerKind::InstancePool,
            PoolManagerRef::SksNodepool { .. } => ManagerKind::SksNodepool,
        }
    }
}

impl fmt::Display for PoolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.manager {
            PoolManagerRef::InstancePool => write!(f, "instance-pool/{}", self.id),
            PoolManagerRef::SksNodepool {
                cluster_id,
                nodepool_id,
            } => write!(f, "sks-cluster/{cluster_id}/nodepool/{nodepool_id}"),
        }
    }
}

/// An SKS cluster and the nodepools it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SksCluster {
    pub id: String,
    pub name: String,
    pub nodepools: Vec<SksNodepool>,
}

/// An SKS nodepool; each one is backed by exactly one instance pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SksNodepool {
    pub id: String,
    pub name: String,
    pub instance_pool_id: PoolId,
}

// ── Instances ──────────────────────────────────────────────────────

/// Lifecycle state of a compute instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Creating,
    Running,
    Stopping,
    Stopped,
    Error,
    Destroying,
    Destroyed,
    Other(String),
}

impl InstanceState {
    pub fn parse(s: &str) -> Self {
        match s {
            "creating" | "starting" => InstanceState::Creating,
            "running" => InstanceState::Running,
            "stopping" => InstanceState::Stopping,
            "stopped" => InstanceState::Stopped,
            "error" => InstanceState::Error,
            "destroying" | "expunging" => InstanceState::Destroying,
            "destroyed" => InstanceState::Destroyed,
            other => InstanceState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            InstanceState::Creating => "creating",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Error => "error",
            InstanceState::Destroying => "destroying",
            InstanceState::Destroyed => "destroyed",
            InstanceState::Other(s) => s,
        }
    }

    /// Whether the instance is on its way out (or already gone).
    pub fn is_terminating(&self) -> bool {
        matches!(self, InstanceState::Destroying | InstanceState::Destroyed)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compute instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub state: InstanceState,
    /// Owning instance pool, when the instance is managed by one.
    pub pool_id: Option<PoolId>,
    pub instance_type_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Filter for instance listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerFilter {
    pub kind: ManagerKind,
    pub id: Option<String>,
}

impl ManagerFilter {
    /// All instances managed by any instance pool.
    pub fn instance_pools() -> Self {
        Self {
            kind: ManagerKind::InstancePool,
            id: None,
        }
    }

    /// Instances managed by one instance pool.
    pub fn instance_pool(id: impl Into<String>) -> Self {
        Self {
            kind: ManagerKind::InstancePool,
            id: Some(id.into()),
        }
    }
}

// ── Operations ─────────────────────────────────────────────────────

/// State of an asynchronous operation. Monotonic: `Pending` → terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Success,
    Failure,
    Timeout,
}

impl OperationState {
    /// Strict parse; unknown values are a protocol error upstream.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OperationState::Pending),
            "success" => Some(OperationState::Success),
            "failure" => Some(OperationState::Failure),
            "timeout" => Some(OperationState::Timeout),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationState::Pending => "pending",
            OperationState::Success => "success",
            OperationState::Failure => "failure",
            OperationState::Timeout => "timeout",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != OperationState::Pending
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity affected by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationReference {
    pub id: Option<String>,
    pub link: Option<String>,
    pub command: Option<String>,
}

/// Handle for an asynchronous cloud action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub id: OperationId,
    pub state: OperationState,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub reference: Option<OperationReference>,
}

impl Operation {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// ── Quotas & instance types ────────────────────────────────────────

/// Organization-scoped resource limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    pub resource: String,
    pub usage: i64,
    /// `-1` means unlimited.
    pub limit: i64,
}

impl Quota {
    pub fn is_unlimited(&self) -> bool {
        self.limit < 0
    }

    /// Remaining headroom, `None` when unlimited.
    pub fn available(&self) -> Option<i64> {
        (!self.is_unlimited()).then(|| (self.limit - self.usage).max(0))
    }
}

/// A VM shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceType {
    pub id: String,
    pub family: String,
    pub size: String,
    pub cpus: i64,
    /// Memory in bytes.
    pub memory: i64,
    pub gpus: i64,
    pub authorized: bool,
}

impl InstanceType {
    /// Human name such as `standard.medium`.
    pub fn name(&self) -> String {
        format!("{}.{}", self.family, self.size)
    }
}
