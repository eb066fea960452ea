//! Node group model — one autoscaling group backed by one instance pool.
//!
//! Everything here is a pure function of a [`Snapshot`]: readiness derived
//! from the pool state, the member list with lifecycle status, and the
//! template node advertised for scale-from-zero.

use std::collections::BTreeMap;
use std::fmt;

use exoscale_api::{
    Instance, InstanceState, InstanceType, Pool, PoolManagerRef, PoolRef, PoolState, Zone,
};
use tokio::time::Instant;
use tracing::warn;

use crate::cache::Snapshot;
use crate::config::NodeGroupSpec;
use crate::error::{Error, Result};
use crate::identity::ProviderId;

pub const LABEL_OS: &str = "kubernetes.io/os";
pub const LABEL_ARCH: &str = "kubernetes.io/arch";
pub const LABEL_INSTANCE_TYPE: &str = "node.kubernetes.io/instance-type";
pub const LABEL_REGION: &str = "topology.kubernetes.io/region";
pub const LABEL_ZONE: &str = "topology.kubernetes.io/zone";
pub const LABEL_POOL_ID: &str = "node.exoscale.net/instance-pool-id";
pub const LABEL_NODEPOOL_ID: &str = "node.exoscale.net/nodepool-id";
pub const LABEL_CLUSTER_ID: &str = "node.exoscale.net/sks-cluster-id";
/// Set on GPU nodes; the value is the instance type family.
pub const GPU_LABEL: &str = "node.exoscale.net/gpu";

// ── Readiness ──────────────────────────────────────────────────────

/// Whether a group's pool accepts mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Converging; mutations fail with `Busy`.
    Transitioning,
    /// Needs an operator; mutations fail with `Conflict`.
    Degraded,
    /// Being destroyed.
    Terminal,
}

impl Readiness {
    pub fn of(state: &PoolState) -> Self {
        match state {
            PoolState::Running => Readiness::Ready,
            PoolState::Creating
            | PoolState::ScalingUp
            | PoolState::ScalingDown
            | PoolState::Updating => Readiness::Transitioning,
            PoolState::Suspended | PoolState::Error | PoolState::Other(_) => Readiness::Degraded,
            PoolState::Destroying => Readiness::Terminal,
        }
    }

    /// Gate a mutation on `pool`.
    pub fn check(pool: &Pool) -> Result<()> {
        match Self::of(&pool.state) {
            Readiness::Ready => Ok(()),
            Readiness::Transitioning => Err(Error::Busy {
                pool_id: pool.id.clone(),
                state: pool.state.to_string(),
            }),
            Readiness::Degraded | Readiness::Terminal => Err(Error::Conflict {
                pool_id: pool.id.clone(),
                state: pool.state.to_string(),
            }),
        }
    }
}

// ── Nodes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Creating,
    Running,
    Deleting,
    Other,
}

impl NodeStatus {
    pub fn of(state: &InstanceState) -> Self {
        match state {
            InstanceState::Creating => NodeStatus::Creating,
            InstanceState::Running => NodeStatus::Running,
            InstanceState::Stopping | InstanceState::Destroying | InstanceState::Destroyed => {
                NodeStatus::Deleting
            }
            InstanceState::Stopped | InstanceState::Error | InstanceState::Other(_) => {
                NodeStatus::Other
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Creating => "creating",
            NodeStatus::Running => "running",
            NodeStatus::Deleting => "deleting",
            NodeStatus::Other => "other",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pool member as presented to the autoscaler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub provider_id: ProviderId,
    pub status: NodeStatus,
    /// Set for instances the cloud reports in `error` state.
    pub error: Option<String>,
}

impl Node {
    fn from_instance(instance: &Instance) -> Result<Self> {
        let error = (instance.state == InstanceState::Error)
            .then(|| format!("instance {} is in error state", instance.id));
        Ok(Self {
            provider_id: ProviderId::for_instance(&instance.id)?,
            status: NodeStatus::of(&instance.state),
            error,
        })
    }
}

// ── Template ───────────────────────────────────────────────────────

/// Allocatable resources of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub cpu: i64,
    /// Bytes.
    pub memory: i64,
    pub gpu: i64,
    pub pods: u32,
}

/// Synthetic node used for scale-from-zero decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTemplate {
    pub name: String,
    pub instance_type: String,
    pub capacity: Capacity,
    pub labels: BTreeMap<String, String>,
}

// ── Group model ────────────────────────────────────────────────────

/// Static description of a configured group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupModel {
    pub spec: NodeGroupSpec,
    pub pool_ref: PoolRef,
}

/// Size recorded when the cloud accepted a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTarget {
    pub size: u64,
    pub accepted_at: Instant,
}

impl GroupModel {
    pub fn new(spec: NodeGroupSpec, pool_ref: PoolRef) -> Self {
        Self { spec, pool_ref }
    }

    pub fn id(&self) -> &str {
        &self.pool_ref.id
    }

    /// Pool size from the snapshot, or the pending target while the
    /// snapshot predates the mutation that set it.
    pub fn target_size(&self, snapshot: &Snapshot, pending: Option<PendingTarget>) -> u64 {
        let observed = snapshot.pool(self.id()).map(|p| p.size);
        match (pending, observed) {
            (Some(p), _) if snapshot.started_at() < p.accepted_at => p.size,
            (Some(p), Some(size)) if size != p.size => {
                warn!(
                    pool_id = %self.id(),
                    expected = p.size,
                    observed = size,
                    "pool size has not converged to the accepted target"
                );
                size
            }
            (_, observed) => observed.unwrap_or(0),
        }
    }

    pub fn nodes(&self, snapshot: &Snapshot) -> Vec<Node> {
        snapshot
            .members(self.id())
            .filter_map(|instance| match Node::from_instance(instance) {
                Ok(node) => Some(node),
                Err(e) => {
                    warn!(instance_id = %instance.id, error = %e, "skipping member with unmappable id");
                    None
                }
            })
            .collect()
    }

    pub fn template(&self, snapshot: &Snapshot, zone: &Zone, max_pods: u32) -> Result<NodeTemplate> {
        let pool = snapshot.pool(self.id()).ok_or_else(|| {
            Error::Unavailable(format!("pool {} missing from snapshot", self.id()))
        })?;
        let itype = snapshot.instance_type(&pool.instance_type_id).ok_or_else(|| {
            Error::Unavailable(format!(
                "instance type {} of pool {} missing from snapshot",
                pool.instance_type_id, pool.id
            ))
        })?;

        Ok(NodeTemplate {
            name: format!("template-node-for-{}", pool.id),
            instance_type: itype.name(),
            capacity: Capacity {
                cpu: itype.cpus,
                memory: itype.memory,
                gpu: itype.gpus,
                pods: max_pods,
            },
            labels: self.template_labels(pool, itype, zone),
        })
    }

    fn template_labels(
        &self,
        pool: &Pool,
        itype: &InstanceType,
        zone: &Zone,
    ) -> BTreeMap<String, String> {
        // Pool labels first so the well-known keys below win.
        let mut labels = pool.labels.clone();
        let mut set = |k: &str, v: &str| {
            labels.insert(k.to_string(), v.to_string());
        };
        set(LABEL_OS, "linux");
        set(LABEL_ARCH, "amd64");
        set(LABEL_INSTANCE_TYPE, &itype.name());
        set(LABEL_REGION, zone.as_str());
        set(LABEL_ZONE, zone.as_str());
        set(LABEL_POOL_ID, &pool.id);
        if let PoolManagerRef::SksNodepool {
            cluster_id,
            nodepool_id,
        } = &self.pool_ref.manager
        {
            set(LABEL_NODEPOOL_ID, nodepool_id);
            set(LABEL_CLUSTER_ID, cluster_id);
        }
        if itype.gpus > 0 {
            set(GPU_LABEL, &itype.family);
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exoscale_api::ErrorKind;

    const I1: &str = "00000000-0000-0000-0000-000000000011";
    const I2: &str = "00000000-0000-0000-0000-000000000012";

    fn pool(state: PoolState, size: u64) -> Pool {
        Pool {
            id: "p1".into(),
            name: "workers".into(),
            size,
            state,
            instance_type_id: "t-gpu".into(),
            instance_ids: vec![I1.into(), I2.into()],
            manager: None,
            labels: BTreeMap::from([("team".to_string(), "core".to_string())]),
        }
    }

    fn instance(id: &str, state: InstanceState) -> Instance {
        Instance {
            id: id.into(),
            name: id.into(),
            state,
            pool_id: Some("p1".into()),
            instance_type_id: Some("t-gpu".into()),
            created_at: None,
        }
    }

    fn snapshot(size: u64) -> Snapshot {
        Snapshot::build(
            Instant::now(),
            vec![pool(PoolState::Running, size)],
            vec![],
            vec![
                instance(I1, InstanceState::Running),
                instance(I2, InstanceState::Error),
            ],
            vec![],
            vec![InstanceType {
                id: "t-gpu".into(),
                family: "gpu2".into(),
                size: "small".into(),
                cpus: 12,
                memory: 56 << 30,
                gpus: 1,
                authorized: true,
            }],
        )
    }

    fn model() -> GroupModel {
        GroupModel::new(
            NodeGroupSpec {
                min: 1,
                max: 5,
                pool_id: "p1".into(),
            },
            PoolRef::sks_nodepool("p1", "c1", "np1"),
        )
    }

    #[test]
    fn readiness_table() {
        assert_eq!(Readiness::of(&PoolState::Running), Readiness::Ready);
        assert_eq!(Readiness::of(&PoolState::ScalingDown), Readiness::Transitioning);
        assert_eq!(Readiness::of(&PoolState::Creating), Readiness::Transitioning);
        assert_eq!(Readiness::of(&PoolState::Suspended), Readiness::Degraded);
        assert_eq!(
            Readiness::of(&PoolState::Other("migrating".into())),
            Readiness::Degraded
        );
        assert_eq!(Readiness::of(&PoolState::Destroying), Readiness::Terminal);
    }

    #[test]
    fn readiness_gates_mutations() {
        assert!(Readiness::check(&pool(PoolState::Running, 1)).is_ok());
        assert_eq!(
            Readiness::check(&pool(PoolState::Updating, 1)).unwrap_err().kind(),
            ErrorKind::Busy
        );
        assert_eq!(
            Readiness::check(&pool(PoolState::Error, 1)).unwrap_err().kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            Readiness::check(&pool(PoolState::Destroying, 1)).unwrap_err().kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn nodes_carry_status_and_error() {
        let nodes = model().nodes(&snapshot(2));
        assert_eq!(nodes.len(), 2);
        let running = nodes
            .iter()
            .find(|n| n.provider_id.instance_id() == I1)
            .unwrap();
        assert_eq!(running.status, NodeStatus::Running);
        let broken = nodes
            .iter()
            .find(|n| n.provider_id.instance_id() == I2)
            .unwrap();
        assert_eq!(broken.status, NodeStatus::Other);
        assert!(broken.error.is_some());
        assert_eq!(running.status.to_string(), "running");
        assert_eq!(NodeStatus::of(&InstanceState::Destroying).to_string(), "deleting");
    }

    #[test]
    fn target_size_prefers_pending_until_snapshot_catches_up() {
        let snap = snapshot(2);
        let m = model();
        assert_eq!(m.target_size(&snap, None), 2);

        let later = PendingTarget {
            size: 4,
            accepted_at: snap.started_at() + std::time::Duration::from_secs(1),
        };
        assert_eq!(m.target_size(&snap, Some(later)), 4);

        let earlier = PendingTarget {
            size: 4,
            accepted_at: snap.started_at(),
        };
        assert_eq!(m.target_size(&snap, Some(earlier)), 2);
    }

    #[test]
    fn template_from_instance_type() {
        let zone = Zone::new("ch-gva-2");
        let template = model().template(&snapshot(0), &zone, 110).unwrap();
        assert_eq!(template.instance_type, "gpu2.small");
        assert_eq!(template.capacity.cpu, 12);
        assert_eq!(template.capacity.gpu, 1);
        assert_eq!(template.capacity.pods, 110);
        assert_eq!(template.labels[LABEL_ZONE], "ch-gva-2");
        assert_eq!(template.labels[LABEL_POOL_ID], "p1");
        assert_eq!(template.labels[LABEL_NODEPOOL_ID], "np1");
        assert_eq!(template.labels[LABEL_CLUSTER_ID], "c1");
        assert_eq!(template.labels[GPU_LABEL], "gpu2");
        assert_eq!(template.labels["team"], "core");
    }
}
