//! Pool controller — serialized, validated mutations of one pool.
//!
//! Every mutation takes the pool's FIFO mutex, re-reads the pool from a
//! fresh snapshot, checks its preconditions and only then talks to the
//! cloud. Rejected preconditions never reach the cloud.
//!
//! # Increase
//!
//! ```text
//! delta = 0 ──────────────────────────────→ OutOfRange
//! lock(pool) → fresh snapshot (stale → Unavailable)
//!   size + delta > max ───────────────────→ OutOfRange
//!   usage + delta·cost > limit ───────────→ Quota
//!   pool not Ready ───────────────────────→ Busy | Conflict
//!   scale_pool(size + delta) → record target → wait → invalidate
//! ```
//!
//! # Delete nodes
//!
//! ```text
//! [] ─────────────────────────────────────→ Ok, no requests
//! parse ids (Format) → lock(pool) → fresh snapshot
//!   member of another pool ───────────────→ NotFound
//!   gone / terminating ───────────────────→ skipped
//!   nothing left ─────────────────────────→ Ok
//!   size − n < min ───────────────────────→ OutOfRange
//!   pool not Ready ───────────────────────→ Busy | Conflict
//!   manager supports eviction?
//!     yes → evict_pool_members(ids) → wait
//!     no  → delete_instance × n (≤ K in flight) → wait each
//!           → scale_pool(size − deleted) → wait
//!   record target → invalidate
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use exoscale_api::{
    ApiError, CallContext, CloudApi, InstanceId, ManagerKind, Operation, Pool, PoolId, PoolRef,
};
use futures_util::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{ResourceCache, Snapshot};
use crate::config::ProviderConfig;
use crate::error::{Error, PoolAction, Result};
use crate::identity::{ProviderId, Resolution, resolve};
use crate::node_group::{GroupModel, PendingTarget, Readiness};
use crate::waiter::OperationWaiter;

/// Quota resource charged one unit per instance.
pub const QUOTA_INSTANCE: &str = "instance";
/// Quota resource charged one unit per GPU.
pub const QUOTA_GPU: &str = "gpu";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub scale_timeout: Duration,
    pub delete_timeout: Duration,
    /// Concurrent `delete_instance` calls on the fallback path.
    pub delete_concurrency: usize,
    pub eviction_managers: Vec<ManagerKind>,
}

impl ControllerConfig {
    pub fn from_provider(config: &ProviderConfig) -> Self {
        Self {
            scale_timeout: config.scale_timeout,
            delete_timeout: config.delete_timeout,
            delete_concurrency: config.delete_concurrency.max(1),
            eviction_managers: config.eviction_managers.clone(),
        }
    }
}

pub struct PoolController {
    api: Arc<dyn CloudApi>,
    cache: Arc<ResourceCache>,
    waiter: OperationWaiter,
    config: ControllerConfig,
    locks: Mutex<HashMap<PoolId, Arc<tokio::sync::Mutex<()>>>>,
    pending: Mutex<HashMap<PoolId, PendingTarget>>,
}

impl PoolController {
    pub fn new(
        api: Arc<dyn CloudApi>,
        cache: Arc<ResourceCache>,
        waiter: OperationWaiter,
        config: ControllerConfig,
    ) -> Self {
        Self {
            api,
            cache,
            waiter,
            config,
            locks: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    // ── Target size ────────────────────────────────────────────────

    /// Target size of `group` as seen through `snapshot`, honouring an
    /// accepted-but-unobserved mutation. The recorded target is dropped
    /// once a snapshot taken after acceptance has been consulted.
    pub fn target_size(&self, group: &GroupModel, snapshot: &Snapshot) -> u64 {
        let mut pending = self.pending_map();
        let recorded = pending.get(group.id()).copied();
        let size = group.target_size(snapshot, recorded);
        if let Some(target) = recorded
            && snapshot.started_at() >= target.accepted_at
        {
            pending.remove(group.id());
        }
        size
    }

    fn record_target(&self, pool_id: &str, size: u64) {
        self.pending_map().insert(
            pool_id.to_string(),
            PendingTarget {
                size,
                accepted_at: Instant::now(),
            },
        );
    }

    fn forget_target(&self, pool_id: &str) {
        self.pending_map().remove(pool_id);
    }

    /// Drop all per-pool state.
    pub fn clear(&self) {
        self.pending_map().clear();
        self.lock_map().clear();
    }

    fn pending_map(&self) -> MutexGuard<'_, HashMap<PoolId, PendingTarget>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<PoolId, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pool_lock(&self, pool_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.lock_map()
            .entry(pool_id.to_string())
            .or_default()
            .clone()
    }

    // ── Increase ───────────────────────────────────────────────────

    pub async fn increase(&self, ctx: &CallContext, group: &GroupModel, delta: u64) -> Result<()> {
        self.increase_inner(ctx, group, delta)
            .await
            .map_err(|e| e.in_pool(group.id(), PoolAction::Increase))
    }

    async fn increase_inner(&self, ctx: &CallContext, group: &GroupModel, delta: u64) -> Result<()> {
        if delta == 0 {
            return Err(Error::OutOfRange {
                group: group.id().to_string(),
                reason: "increase delta must be positive".to_string(),
            });
        }

        let lock = self.pool_lock(group.id());
        let _guard = ctx.run(async { Ok(lock.lock_owned().await) }).await?;

        let snapshot = self.cache.get(ctx).await?.require_fresh()?;
        let pool = current_pool(&snapshot, group)?;

        let target = pool.size.saturating_add(delta);
        if target > group.spec.max {
            return Err(Error::OutOfRange {
                group: group.id().to_string(),
                reason: format!(
                    "size {} + {delta} exceeds max {}",
                    pool.size, group.spec.max
                ),
            });
        }
        check_quota(&snapshot, pool, delta)?;
        Readiness::check(pool)?;

        let op = ctx.run(self.api.scale_pool(&group.pool_ref, target)).await?;
        self.record_target(group.id(), target);
        info!(
            pool_id = %group.id(),
            from = pool.size,
            to = target,
            delta,
            operation_id = %op.id,
            "scale up accepted"
        );

        let waited = self
            .waiter
            .wait(ctx, op, self.config.scale_timeout)
            .await;
        self.settle(group.id(), &waited).await;
        waited?;
        Ok(())
    }

    // ── Delete nodes ───────────────────────────────────────────────

    pub async fn delete_nodes(
        &self,
        ctx: &CallContext,
        group: &GroupModel,
        provider_ids: &[String],
    ) -> Result<()> {
        self.delete_inner(ctx, group, provider_ids)
            .await
            .map_err(|e| e.in_pool(group.id(), PoolAction::DeleteNodes))
    }

    async fn delete_inner(
        &self,
        ctx: &CallContext,
        group: &GroupModel,
        provider_ids: &[String],
    ) -> Result<()> {
        if provider_ids.is_empty() {
            return Ok(());
        }
        let parsed = provider_ids
            .iter()
            .map(|raw| ProviderId::parse(raw))
            .collect::<Result<Vec<_>>>()?;

        let lock = self.pool_lock(group.id());
        let _guard = ctx.run(async { Ok(lock.lock_owned().await) }).await?;

        let snapshot = self.cache.get(ctx).await?.require_fresh()?;
        let pool = current_pool(&snapshot, group)?;

        let mut present: Vec<InstanceId> = Vec::with_capacity(parsed.len());
        for pid in &parsed {
            match resolve(&snapshot, pid) {
                Resolution::Member(instance) if instance.pool_id.as_deref() != Some(group.id()) => {
                    return Err(Error::NodeNotFound {
                        provider_id: pid.to_string(),
                        group: group.id().to_string(),
                    });
                }
                Resolution::Member(instance) if instance.state.is_terminating() => {
                    debug!(instance_id = %instance.id, state = %instance.state, "node already terminating");
                }
                Resolution::Member(instance) => {
                    if !present.contains(&instance.id) {
                        present.push(instance.id.clone());
                    }
                }
                Resolution::Gone => {
                    debug!(provider_id = %pid, "node already gone");
                }
            }
        }
        if present.is_empty() {
            debug!(pool_id = %group.id(), "all nodes already gone; nothing to delete");
            return Ok(());
        }

        let n = present.len() as u64;
        let remaining = pool.size.saturating_sub(n);
        if pool.size < n || remaining < group.spec.min {
            return Err(Error::OutOfRange {
                group: group.id().to_string(),
                reason: format!(
                    "size {} - {n} is below min {}",
                    pool.size, group.spec.min
                ),
            });
        }
        Readiness::check(pool)?;

        if self
            .config
            .eviction_managers
            .contains(&group.pool_ref.manager_kind())
        {
            self.evict(ctx, &group.pool_ref, pool.size, &present).await
        } else {
            self.delete_then_shrink(ctx, &group.pool_ref, pool.size, &present)
                .await
        }
    }

    async fn evict(
        &self,
        ctx: &CallContext,
        pool_ref: &PoolRef,
        size: u64,
        members: &[InstanceId],
    ) -> Result<()> {
        let op = ctx
            .run(self.api.evict_pool_members(pool_ref, members))
            .await?;
        let target = size - members.len() as u64;
        self.record_target(&pool_ref.id, target);
        info!(
            pool_id = %pool_ref.id,
            evicted = members.len(),
            to = target,
            operation_id = %op.id,
            "eviction accepted"
        );

        let waited = self
            .waiter
            .wait(ctx, op, self.config.scale_timeout)
            .await;
        self.settle(&pool_ref.id, &waited).await;
        waited?;
        Ok(())
    }

    /// Best effort: the cloud may count other members as removed.
    async fn delete_then_shrink(
        &self,
        ctx: &CallContext,
        pool_ref: &PoolRef,
        size: u64,
        members: &[InstanceId],
    ) -> Result<()> {
        warn!(
            pool_id = %pool_ref.id,
            manager = %pool_ref.manager_kind(),
            count = members.len(),
            "manager does not support eviction; deleting instances one by one"
        );

        let results: Vec<(InstanceId, Result<()>)> = stream::iter(members.iter().cloned())
            .map(|id| async move {
                let outcome = self.delete_one(ctx, &id).await;
                (id, outcome)
            })
            .buffer_unordered(self.config.delete_concurrency)
            .collect()
            .await;

        let mut deleted = 0u64;
        let mut first_error = None;
        for (id, outcome) in results {
            match outcome {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(pool_id = %pool_ref.id, instance_id = %id, error = %e, "instance deletion failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if deleted > 0 {
            let target = size - deleted;
            let op = ctx.run(self.api.scale_pool(pool_ref, target)).await?;
            self.record_target(&pool_ref.id, target);
            info!(
                pool_id = %pool_ref.id,
                deleted,
                to = target,
                operation_id = %op.id,
                "size correction accepted"
            );
            let waited = self
                .waiter
                .wait(ctx, op, self.config.scale_timeout)
                .await;
            self.settle(&pool_ref.id, &waited).await;
            waited?;
        } else {
            self.cache.invalidate(&pool_ref.id).await;
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn delete_one(&self, ctx: &CallContext, instance_id: &str) -> Result<()> {
        let op = match ctx.run(self.api.delete_instance(instance_id)).await {
            Ok(op) => op,
            Err(ApiError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        debug!(%instance_id, operation_id = %op.id, "instance deletion accepted");
        match self.waiter.wait(ctx, op, self.config.delete_timeout).await {
            Ok(_) | Err(ApiError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ── Decrease target size ───────────────────────────────────────

    /// Shrinking without naming members lets the cloud choose victims.
    pub fn decrease_target_size(&self, group: &GroupModel, delta: i64) -> Result<()> {
        Err(Error::Unsupported(format!(
            "decreasing target size by {delta} without naming nodes; use delete-nodes"
        ))
        .in_pool(group.id(), PoolAction::DecreaseTargetSize))
    }

    /// Post-wait bookkeeping shared by every mutation.
    async fn settle(&self, pool_id: &str, waited: &exoscale_api::ApiResult<Operation>) {
        match waited {
            Ok(op) => {
                info!(%pool_id, operation_id = %op.id, "pool mutation finished");
            }
            // The cloud may still apply it; keep the recorded target.
            Err(ApiError::Timeout(_) | ApiError::Canceled) => {}
            Err(e) => {
                warn!(%pool_id, error = %e, "pool mutation failed");
                self.forget_target(pool_id);
            }
        }
        self.cache.invalidate(pool_id).await;
    }
}

fn current_pool<'a>(snapshot: &'a Snapshot, group: &GroupModel) -> Result<&'a Pool> {
    snapshot.pool(group.id()).ok_or_else(|| {
        Error::Api(ApiError::NotFound(format!(
            "instance pool {} not found",
            group.id()
        )))
    })
}

/// Reject an increase that would exceed any known quota.
fn check_quota(snapshot: &Snapshot, pool: &Pool, delta: u64) -> Result<()> {
    let delta = i64::try_from(delta).unwrap_or(i64::MAX);
    let mut costs: Vec<(&str, i64)> = vec![(QUOTA_INSTANCE, 1)];
    match snapshot.instance_type(&pool.instance_type_id) {
        Some(itype) if itype.gpus > 0 => {
            costs.push((QUOTA_GPU, itype.gpus));
            costs.push((itype.family.as_str(), itype.gpus));
        }
        Some(_) => {}
        None => {
            debug!(
                pool_id = %pool.id,
                instance_type_id = %pool.instance_type_id,
                "instance type unknown; checking instance quota only"
            );
        }
    }

    for (resource, per_node) in costs {
        let Some(quota) = snapshot.quota(resource) else {
            continue;
        };
        if quota.is_unlimited() {
            continue;
        }
        let requested = delta.saturating_mul(per_node);
        if quota.usage.saturating_add(requested) > quota.limit {
            return Err(Error::Quota {
                resource: resource.to_string(),
                usage: quota.usage,
                requested,
                limit: quota.limit,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeGroupSpec;
    use crate::waiter::WaiterConfig;
    use exoscale_api::fake::{Call, FakeCloud, Method};
    use exoscale_api::{ErrorKind, InstanceType, PoolState};

    struct Harness {
        cloud: Arc<FakeCloud>,
        cache: Arc<ResourceCache>,
        controller: PoolController,
    }

    fn harness(cloud: Arc<FakeCloud>, eviction_managers: Vec<ManagerKind>) -> Harness {
        let cache = Arc::new(ResourceCache::new(
            cloud.clone(),
            Duration::from_secs(30),
            Duration::from_secs(30),
        ));
        let controller = PoolController::new(
            cloud.clone(),
            cache.clone(),
            OperationWaiter::new(cloud.clone(), WaiterConfig::default()),
            ControllerConfig {
                scale_timeout: Duration::from_secs(600),
                delete_timeout: Duration::from_secs(120),
                delete_concurrency: 2,
                eviction_managers,
            },
        );
        Harness {
            cloud,
            cache,
            controller,
        }
    }

    fn group(min: u64, max: u64) -> GroupModel {
        GroupModel::new(
            NodeGroupSpec {
                min,
                max,
                pool_id: "p1".into(),
            },
            PoolRef::instance_pool("p1"),
        )
    }

    fn gpu_type() -> InstanceType {
        InstanceType {
            id: "t-gpu".into(),
            family: "gpu2".into(),
            size: "medium".into(),
            cpus: 16,
            memory: 90 << 30,
            gpus: 2,
            authorized: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gpu_quota_charges_per_gpu() {
        let cloud = Arc::new(FakeCloud::new("ch-gva-2"));
        cloud.add_instance_type(gpu_type());
        cloud.add_pool("p1", "t-gpu", 1, PoolState::Running);
        cloud.set_quota("instance", 1, 50);
        cloud.set_quota("gpu2", 2, 6);
        let h = harness(cloud, vec![ManagerKind::InstancePool]);

        let err = h
            .controller
            .increase(&CallContext::background(), &group(0, 10), 3)
            .await
            .unwrap_err();
        match err.root() {
            Error::Quota {
                resource,
                requested,
                ..
            } => {
                assert_eq!(resource, "gpu2");
                assert_eq!(*requested, 6);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(h.cloud.mutating_calls().is_empty());

        h.controller
            .increase(&CallContext::background(), &group(0, 10), 2)
            .await
            .unwrap();
        assert_eq!(h.cloud.pool("p1").unwrap().size, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_quota_is_skipped() {
        let cloud = Arc::new(FakeCloud::new("ch-gva-2"));
        cloud.add_pool("p1", "t1", 1, PoolState::Running);
        cloud.set_quota("instance", 500, -1);
        let h = harness(cloud, vec![ManagerKind::InstancePool]);
        h.controller
            .increase(&CallContext::background(), &group(0, 10), 4)
            .await
            .unwrap();
        assert_eq!(h.cloud.pool("p1").unwrap().size, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_snapshot_refuses_mutation() {
        let cloud = Arc::new(FakeCloud::new("ch-gva-2"));
        cloud.add_pool("p1", "t1", 1, PoolState::Running);
        let h = harness(cloud, vec![ManagerKind::InstancePool]);
        let ctx = CallContext::background();
        h.cache.get(&ctx).await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        h.cloud
            .fail_next(Method::ListPools, ApiError::Transport("reset".into()));
        let err = h.controller.increase(&ctx, &group(0, 10), 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(h.cloud.mutating_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_operation_forgets_target() {
        let cloud = Arc::new(FakeCloud::new("ch-gva-2"));
        cloud.add_pool("p1", "t1", 2, PoolState::Running);
        let h = harness(cloud, vec![ManagerKind::InstancePool]);
        let ctx = CallContext::background();
        let g = group(0, 10);

        h.cloud.fail_next_operation("conflict", "pool is locked");
        let err = h.controller.increase(&ctx, &g, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().starts_with("increase on pool p1"));

        let snap = h.cache.get(&ctx).await.unwrap().snapshot;
        assert_eq!(h.controller.target_size(&g, &snap), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn divergent_snapshot_drops_recorded_target() {
        let cloud = Arc::new(FakeCloud::new("ch-gva-2"));
        cloud.add_pool("p1", "t1", 2, PoolState::Running);
        let h = harness(cloud, vec![ManagerKind::InstancePool]);
        let ctx = CallContext::background();
        let g = group(0, 10);

        h.controller.increase(&ctx, &g, 2).await.unwrap();
        assert_eq!(h.controller.pending_map()["p1"].size, 4);

        // Resized elsewhere after the scale was accepted.
        h.cloud
            .scale_pool(&PoolRef::instance_pool("p1"), 3)
            .await
            .unwrap();
        let snap = h.cache.get(&ctx).await.unwrap().snapshot;
        assert_eq!(h.controller.target_size(&g, &snap), 3);
        assert!(!h.controller.pending_map().contains_key("p1"));
        assert_eq!(h.controller.target_size(&g, &snap), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_deletes_then_shrinks() {
        let cloud = Arc::new(FakeCloud::new("ch-gva-2"));
        let members = cloud.add_pool("p1", "t1", 4, PoolState::Running);
        let h = harness(cloud, vec![ManagerKind::SksNodepool]);
        let ids: Vec<String> = members[..3]
            .iter()
            .map(|i| format!("exoscale://{i}"))
            .collect();

        h.controller
            .delete_nodes(&CallContext::background(), &group(0, 10), &ids)
            .await
            .unwrap();

        let mutating = h.cloud.mutating_calls();
        assert_eq!(mutating.len(), 4);
        assert!(
            mutating[..3]
                .iter()
                .all(|c| matches!(c, Call::DeleteInstance(_)))
        );
        assert_eq!(
            mutating[3],
            Call::ScalePool {
                pool: PoolRef::instance_pool("p1"),
                size: 1
            }
        );
        let pool = h.cloud.pool("p1").unwrap();
        assert_eq!(pool.size, 1);
        assert_eq!(pool.instance_ids, vec![members[3].clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_treats_missing_instance_as_deleted() {
        let cloud = Arc::new(FakeCloud::new("ch-gva-2"));
        let members = cloud.add_pool("p1", "t1", 3, PoolState::Running);
        let h = harness(cloud, vec![]);
        h.cloud.fail_next(
            Method::DeleteInstance,
            ApiError::NotFound("instance gone".into()),
        );

        h.controller
            .delete_nodes(
                &CallContext::background(),
                &group(0, 10),
                &[format!("exoscale://{}", members[0])],
            )
            .await
            .unwrap();
        assert_eq!(h.cloud.pool("p1").unwrap().size, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_below_min_is_rejected() {
        let cloud = Arc::new(FakeCloud::new("ch-gva-2"));
        let members = cloud.add_pool("p1", "t1", 2, PoolState::Running);
        let h = harness(cloud, vec![ManagerKind::InstancePool]);
        let ids: Vec<String> = members.iter().map(|i| format!("exoscale://{i}")).collect();

        let err = h
            .controller
            .delete_nodes(&CallContext::background(), &group(1, 5), &ids)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        assert!(h.cloud.mutating_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_id_is_format_error() {
        let cloud = Arc::new(FakeCloud::new("ch-gva-2"));
        cloud.add_pool("p1", "t1", 2, PoolState::Running);
        let h = harness(cloud, vec![ManagerKind::InstancePool]);
        let err = h
            .controller
            .delete_nodes(
                &CallContext::background(),
                &group(0, 5),
                &["node-1".to_string()],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_pool_is_conflict() {
        let cloud = Arc::new(FakeCloud::new("ch-gva-2"));
        let members = cloud.add_pool("p1", "t1", 2, PoolState::Suspended);
        let h = harness(cloud, vec![ManagerKind::InstancePool]);
        let err = h
            .controller
            .delete_nodes(
                &CallContext::background(),
                &group(0, 5),
                &[format!("exoscale://{}", members[0])],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(h.cloud.mutating_calls().is_empty());
    }

    #[test]
    fn decrease_target_size_is_refused() {
        let cloud = Arc::new(FakeCloud::new("ch-gva-2"));
        let h = harness(cloud, vec![]);
        let err = h
            .controller
            .decrease_target_size(&group(0, 5), -1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().starts_with("decrease-target-size on pool p1"));
    }
}
