//! In-memory [`CloudApi`] for tests.
//!
//! `FakeCloud` keeps pools, instances, quotas and instance types in a
//! mutex-guarded state, records every call it receives, and completes
//! operations after a scripted number of polls. Mutations take effect as
//! soon as the call is accepted; only the operation handle is delayed.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::client::CloudApi;
use crate::error::{ApiError, ApiResult};
use crate::types::*;

/// One recorded façade call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListPools,
    GetPool(PoolId),
    ListSksClusters,
    ListInstances(Option<ManagerFilter>),
    GetInstance(InstanceId),
    ScalePool { pool: PoolRef, size: u64 },
    EvictPoolMembers { pool: PoolRef, instances: Vec<InstanceId> },
    DeleteInstance(InstanceId),
    GetOperation(OperationId),
    ListQuotas,
    ListInstanceTypes,
}

impl Call {
    pub fn method(&self) -> Method {
        match self {
            Call::ListPools => Method::ListPools,
            Call::GetPool(_) => Method::GetPool,
            Call::ListSksClusters => Method::ListSksClusters,
            Call::ListInstances(_) => Method::ListInstances,
            Call::GetInstance(_) => Method::GetInstance,
            Call::ScalePool { .. } => Method::ScalePool,
            Call::EvictPoolMembers { .. } => Method::EvictPoolMembers,
            Call::DeleteInstance(_) => Method::DeleteInstance,
            Call::GetOperation(_) => Method::GetOperation,
            Call::ListQuotas => Method::ListQuotas,
            Call::ListInstanceTypes => Method::ListInstanceTypes,
        }
    }

    /// Calls that change cloud state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::ScalePool { .. } | Call::EvictPoolMembers { .. } | Call::DeleteInstance(_)
        )
    }
}

/// Façade method selector used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    ListPools,
    GetPool,
    ListSksClusters,
    ListInstances,
    GetInstance,
    ScalePool,
    EvictPoolMembers,
    DeleteInstance,
    GetOperation,
    ListQuotas,
    ListInstanceTypes,
}

#[derive(Debug)]
struct FakeOperation {
    op: Operation,
    polls_left: u32,
    outcome: Outcome,
}

#[derive(Debug, Clone)]
struct Outcome {
    state: OperationState,
    reason: Option<String>,
    message: Option<String>,
}

impl Outcome {
    fn success() -> Self {
        Self {
            state: OperationState::Success,
            reason: None,
            message: None,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    pools: BTreeMap<PoolId, Pool>,
    clusters: Vec<SksCluster>,
    instances: BTreeMap<InstanceId, Instance>,
    quotas: Vec<Quota>,
    instance_types: Vec<InstanceType>,
    operations: HashMap<OperationId, FakeOperation>,
    calls: Vec<Call>,
    failures: HashMap<Method, VecDeque<ApiError>>,
    outcomes: VecDeque<Outcome>,
    operation_polls: u32,
    latency: Duration,
    next_id: u128,
}

impl State {
    fn next_uuid(&mut self) -> String {
        self.next_id += 1;
        Uuid::from_u128(self.next_id).to_string()
    }

    fn record(&mut self, call: Call) -> ApiResult<()> {
        let method = call.method();
        self.calls.push(call);
        match self.failures.get_mut(&method).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn spawn_member(&mut self, pool_id: &str, instance_type_id: &str) -> InstanceId {
        let id = self.next_uuid();
        let instance = Instance {
            name: format!(
                "pool-{}-{}",
                pool_id.chars().take(5).collect::<String>(),
                &id[id.len() - 5..]
            ),
            id: id.clone(),
            state: InstanceState::Creating,
            pool_id: Some(pool_id.to_string()),
            instance_type_id: Some(instance_type_id.to_string()),
            created_at: Some(Utc::now()),
        };
        self.instances.insert(id.clone(), instance);
        id
    }

    fn pool_mut(&mut self, id: &str) -> ApiResult<&mut Pool> {
        self.pools
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("instance pool {id} not found")))
    }

    fn check_manager(&self, pool: &PoolRef) -> ApiResult<()> {
        if let PoolManagerRef::SksNodepool {
            cluster_id,
            nodepool_id,
        } = &pool.manager
        {
            let known = self.clusters.iter().any(|c| {
                &c.id == cluster_id
                    && c
                        .nodepools
                        .iter()
                        .any(|np| &np.id == nodepool_id && np.instance_pool_id == pool.id)
            });
            if !known {
                return Err(ApiError::NotFound(format!("nodepool {pool} not found")));
            }
        }
        Ok(())
    }

    /// Issue an operation. The flag is false when the scripted outcome
    /// fails, in which case the caller skips the side effect.
    fn issue_operation(&mut self, reference: &str) -> (Operation, bool) {
        let outcome = self.outcomes.pop_front().unwrap_or_else(Outcome::success);
        let succeeds = outcome.state == OperationState::Success;
        let id = self.next_uuid();
        let mut op = Operation {
            id: id.clone(),
            state: OperationState::Pending,
            reason: None,
            message: None,
            reference: Some(OperationReference {
                id: Some(reference.to_string()),
                link: None,
                command: None,
            }),
        };
        if self.operation_polls == 0 {
            op.state = outcome.state;
            op.reason = outcome.reason.clone();
            op.message = outcome.message.clone();
        }
        self.operations.insert(
            id,
            FakeOperation {
                op: op.clone(),
                polls_left: self.operation_polls,
                outcome,
            },
        );
        (op, succeeds)
    }

    fn remove_member(&mut self, instance_id: &str) {
        if let Some(instance) = self.instances.remove(instance_id)
            && let Some(pool) = instance.pool_id.and_then(|p| self.pools.get_mut(&p))
        {
            pool.instance_ids.retain(|i| i != instance_id);
        }
    }
}

/// In-memory cloud. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct FakeCloud {
    zone: Zone,
    state: Mutex<State>,
}

impl FakeCloud {
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: Zone::new(zone),
            state: Mutex::new(State {
                operation_polls: 1,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Seeding ────────────────────────────────────────────────────

    pub fn add_instance_type(&self, instance_type: InstanceType) {
        self.state().instance_types.push(instance_type);
    }

    /// Create an instance pool with `size` running members. Returns the
    /// member ids in creation order.
    pub fn add_pool(
        &self,
        id: &str,
        instance_type_id: &str,
        size: u64,
        state: PoolState,
    ) -> Vec<InstanceId> {
        let mut s = self.state();
        let members: Vec<InstanceId> = (0..size)
            .map(|_| {
                let iid = s.spawn_member(id, instance_type_id);
                if let Some(i) = s.instances.get_mut(&iid) {
                    i.state = InstanceState::Running;
                }
                iid
            })
            .collect();
        s.pools.insert(
            id.to_string(),
            Pool {
                id: id.to_string(),
                name: format!("pool-{id}"),
                size,
                state,
                instance_type_id: instance_type_id.to_string(),
                instance_ids: members.clone(),
                manager: None,
                labels: BTreeMap::new(),
            },
        );
        members
    }

    /// Put an existing pool under an SKS nodepool.
    pub fn attach_sks_nodepool(&self, pool_id: &str, cluster_id: &str, nodepool_id: &str) {
        let mut s = self.state();
        if let Some(pool) = s.pools.get_mut(pool_id) {
            pool.manager = Some(Manager {
                id: nodepool_id.to_string(),
                kind: Some(ManagerKind::SksNodepool),
            });
        }
        let nodepool = SksNodepool {
            id: nodepool_id.to_string(),
            name: format!("nodepool-{nodepool_id}"),
            instance_pool_id: pool_id.to_string(),
        };
        match s.clusters.iter_mut().find(|c| c.id == cluster_id) {
            Some(cluster) => cluster.nodepools.push(nodepool),
            None => s.clusters.push(SksCluster {
                id: cluster_id.to_string(),
                name: format!("cluster-{cluster_id}"),
                nodepools: vec![nodepool],
            }),
        }
    }

    /// Insert an instance as-is, e.g. one outside any pool.
    pub fn add_instance(&self, instance: Instance) {
        let mut s = self.state();
        if let Some(pool) = instance.pool_id.as_ref().and_then(|p| s.pools.get_mut(p)) {
            pool.instance_ids.push(instance.id.clone());
        }
        s.instances.insert(instance.id.clone(), instance);
    }

    pub fn set_quota(&self, resource: &str, usage: i64, limit: i64) {
        let mut s = self.state();
        s.quotas.retain(|q| q.resource != resource);
        s.quotas.push(Quota {
            resource: resource.to_string(),
            usage,
            limit,
        });
    }

    pub fn set_pool_state(&self, pool_id: &str, state: PoolState) {
        if let Some(pool) = self.state().pools.get_mut(pool_id) {
            pool.state = state;
        }
    }

    pub fn set_instance_state(&self, instance_id: &str, state: InstanceState) {
        if let Some(instance) = self.state().instances.get_mut(instance_id) {
            instance.state = state;
        }
    }

    // ── Scripting ──────────────────────────────────────────────────

    /// Number of `get_operation` polls before an operation turns terminal.
    /// Zero makes mutating calls answer with an already-terminal operation.
    pub fn set_operation_polls(&self, polls: u32) {
        self.state().operation_polls = polls;
    }

    /// Make the next issued operation end in `failure` with `reason`.
    /// The mutation it stands for does not take effect.
    pub fn fail_next_operation(&self, reason: &str, message: &str) {
        self.state().outcomes.push_back(Outcome {
            state: OperationState::Failure,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        });
    }

    /// Queue an error for the next call to `method`.
    pub fn fail_next(&self, method: Method, err: ApiError) {
        self.state()
            .failures
            .entry(method)
            .or_default()
            .push_back(err);
    }

    /// Delay applied before every call.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn pool(&self, id: &str) -> Option<Pool> {
        self.state().pools.get(id).cloned()
    }

    pub fn instance(&self, id: &str) -> Option<Instance> {
        self.state().instances.get(id).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn count(&self, method: Method) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.method() == method)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    async fn delay(&self) {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    fn zone(&self) -> &Zone {
        &self.zone
    }

    async fn list_pools(&self) -> ApiResult<Vec<Pool>> {
        self.delay().await;
        let mut s = self.state();
        s.record(Call::ListPools)?;
        Ok(s.pools.values().cloned().collect())
    }

    async fn get_pool(&self, id: &str) -> ApiResult<Pool> {
        self.delay().await;
        let mut s = self.state();
        s.record(Call::GetPool(id.to_string()))?;
        s.pool_mut(id).map(|p| p.clone())
    }

    async fn list_sks_clusters(&self) -> ApiResult<Vec<SksCluster>> {
        self.delay().await;
        let mut s = self.state();
        s.record(Call::ListSksClusters)?;
        Ok(s.clusters.clone())
    }

    async fn list_instances(&self, filter: Option<&ManagerFilter>) -> ApiResult<Vec<Instance>> {
        self.delay().await;
        let mut s = self.state();
        s.record(Call::ListInstances(filter.cloned()))?;
        Ok(s
            .instances
            .values()
            .filter(|i| match filter {
                None => true,
                Some(f) => {
                    f.kind == ManagerKind::InstancePool
                        && i.pool_id.is_some()
                        && (f.id.is_none() || i.pool_id == f.id)
                }
            })
            .cloned()
            .collect())
    }

    async fn get_instance(&self, id: &str) -> ApiResult<Instance> {
        self.delay().await;
        let mut s = self.state();
        s.record(Call::GetInstance(id.to_string()))?;
        s.instances
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("instance {id} not found")))
    }

    async fn scale_pool(&self, pool: &PoolRef, size: u64) -> ApiResult<Operation> {
        self.delay().await;
        let mut s = self.state();
        s.record(Call::ScalePool {
            pool: pool.clone(),
            size,
        })?;
        s.check_manager(pool)?;
        s.pool_mut(&pool.id)?;

        let (op, succeeds) = s.issue_operation(&pool.id);
        if succeeds {
            let (current, type_id) = {
                let p = s.pool_mut(&pool.id)?;
                p.size = size;
                (p.instance_ids.len() as u64, p.instance_type_id.clone())
            };
            if size > current {
                for _ in current..size {
                    let iid = s.spawn_member(&pool.id, &type_id);
                    s.pool_mut(&pool.id)?.instance_ids.push(iid);
                }
            } else if size < current {
                // The cloud picks which members go; the fake drops the newest.
                let excess: Vec<InstanceId> = s.pool_mut(&pool.id)?.instance_ids
                    [size as usize..]
                    .to_vec();
                for iid in excess {
                    s.remove_member(&iid);
                }
            }
        }
        Ok(op)
    }

    async fn evict_pool_members(
        &self,
        pool: &PoolRef,
        instance_ids: &[InstanceId],
    ) -> ApiResult<Operation> {
        self.delay().await;
        let mut s = self.state();
        s.record(Call::EvictPoolMembers {
            pool: pool.clone(),
            instances: instance_ids.to_vec(),
        })?;
        s.check_manager(pool)?;
        let members = s.pool_mut(&pool.id)?.instance_ids.clone();
        if let Some(stranger) = instance_ids.iter().find(|i| !members.contains(*i)) {
            return Err(ApiError::Conflict(format!(
                "instance {stranger} is not a member of instance pool {}",
                pool.id
            )));
        }

        let (op, succeeds) = s.issue_operation(&pool.id);
        if succeeds {
            for iid in instance_ids {
                s.remove_member(iid);
            }
            let p = s.pool_mut(&pool.id)?;
            p.size = p.size.saturating_sub(instance_ids.len() as u64);
        }
        Ok(op)
    }

    async fn delete_instance(&self, id: &str) -> ApiResult<Operation> {
        self.delay().await;
        let mut s = self.state();
        s.record(Call::DeleteInstance(id.to_string()))?;
        if !s.instances.contains_key(id) {
            return Err(ApiError::NotFound(format!("instance {id} not found")));
        }
        let (op, succeeds) = s.issue_operation(id);
        if succeeds {
            s.remove_member(id);
        }
        Ok(op)
    }

    async fn get_operation(&self, id: &str) -> ApiResult<Operation> {
        self.delay().await;
        let mut s = self.state();
        s.record(Call::GetOperation(id.to_string()))?;
        let entry = s
            .operations
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("operation {id} not found")))?;
        if !entry.op.is_terminal() {
            entry.polls_left = entry.polls_left.saturating_sub(1);
            if entry.polls_left == 0 {
                entry.op.state = entry.outcome.state;
                entry.op.reason = entry.outcome.reason.clone();
                entry.op.message = entry.outcome.message.clone();
            }
        }
        Ok(entry.op.clone())
    }

    async fn list_quotas(&self) -> ApiResult<Vec<Quota>> {
        self.delay().await;
        let mut s = self.state();
        s.record(Call::ListQuotas)?;
        Ok(s.quotas.clone())
    }

    async fn list_instance_types(&self) -> ApiResult<Vec<InstanceType>> {
        self.delay().await;
        let mut s = self.state();
        s.record(Call::ListInstanceTypes)?;
        Ok(s.instance_types.clone())
    }
}
