//! Provider adapter — the contract consumed by the cluster autoscaler.
//!
//! [`ExoscaleProvider`] owns one [`ResourceCache`] and one [`PoolController`]
//! shared by all configured groups. Reads go through the cache and accept a
//! stale snapshot; mutations go through the controller, which insists on a
//! fresh one.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use exoscale_api::{CallContext, CloudApi, Zone};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{ResourceCache, Snapshot};
use crate::config::{NodeGroupSpec, ProviderConfig};
use crate::controller::{ControllerConfig, PoolController};
use crate::error::{Error, Result};
use crate::identity::{ProviderId, Resolution, resolve};
use crate::node_group::{GPU_LABEL, GroupModel, Node, NodeTemplate};
use crate::waiter::OperationWaiter;

pub const PROVIDER_NAME: &str = "exoscale";

/// Instance type families carrying GPUs.
pub const GPU_TYPES: &[&str] = &["gpu", "gpu2", "gpu3"];

// ── Contract ───────────────────────────────────────────────────────

#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn name(&self) -> &str;

    fn node_groups(&self) -> Vec<Arc<dyn NodeGroup>>;

    /// The group owning `provider_id`, or `None` for nodes outside any
    /// configured group.
    async fn node_group_for_node(
        &self,
        ctx: &CallContext,
        provider_id: &str,
    ) -> Result<Option<Arc<dyn NodeGroup>>>;

    /// Force a snapshot no older than this call. Called once per loop.
    async fn refresh(&self, ctx: &CallContext) -> Result<()>;

    fn gpu_label(&self) -> &str;

    fn available_gpu_types(&self) -> BTreeSet<String>;

    /// Release cached state. Idempotent.
    async fn cleanup(&self) -> Result<()>;
}

#[async_trait]
pub trait NodeGroup: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn min_size(&self) -> u64;
    fn max_size(&self) -> u64;

    async fn target_size(&self, ctx: &CallContext) -> Result<u64>;
    async fn increase_size(&self, ctx: &CallContext, delta: u64) -> Result<()>;
    async fn delete_nodes(&self, ctx: &CallContext, provider_ids: &[String]) -> Result<()>;

    /// Always refused; shrinking goes through [`NodeGroup::delete_nodes`].
    async fn decrease_target_size(&self, ctx: &CallContext, delta: i64) -> Result<()>;

    async fn nodes(&self, ctx: &CallContext) -> Result<Vec<Node>>;
    async fn template_node_info(&self, ctx: &CallContext) -> Result<NodeTemplate>;

    fn exist(&self) -> bool;

    fn autoprovisioned(&self) -> bool {
        false
    }

    fn debug(&self) -> String;
}

// ── Implementation ─────────────────────────────────────────────────

struct Shared {
    zone: Zone,
    cache: Arc<ResourceCache>,
    controller: PoolController,
    max_pods_per_node: u32,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl Shared {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Unavailable("provider has been cleaned up".into()));
        }
        Ok(())
    }

    /// Run `fut` unless the provider is, or becomes, closed.
    async fn guarded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        self.ensure_open()?;
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                Err(Error::Unavailable("provider shut down during call".into()))
            }
            out = fut => out,
        }
    }

    async fn snapshot(&self, ctx: &CallContext) -> Result<Arc<Snapshot>> {
        Ok(self.cache.get(ctx).await?.snapshot)
    }
}

pub struct ExoscaleNodeGroup {
    model: GroupModel,
    shared: Arc<Shared>,
}

impl fmt::Debug for ExoscaleNodeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExoscaleNodeGroup")
            .field("spec", &self.model.spec)
            .field("pool", &self.model.pool_ref)
            .finish()
    }
}

#[async_trait]
impl NodeGroup for ExoscaleNodeGroup {
    fn id(&self) -> &str {
        self.model.id()
    }

    fn min_size(&self) -> u64 {
        self.model.spec.min
    }

    fn max_size(&self) -> u64 {
        self.model.spec.max
    }

    async fn target_size(&self, ctx: &CallContext) -> Result<u64> {
        self.shared
            .guarded(async {
                let snapshot = self.shared.snapshot(ctx).await?;
                let size = self.shared.controller.target_size(&self.model, &snapshot);
                if size < self.model.spec.min || size > self.model.spec.max {
                    warn!(
                        pool_id = %self.id(),
                        size,
                        min = self.model.spec.min,
                        max = self.model.spec.max,
                        "pool size outside node group bounds"
                    );
                }
                Ok(size)
            })
            .await
    }

    async fn increase_size(&self, ctx: &CallContext, delta: u64) -> Result<()> {
        self.shared
            .guarded(self.shared.controller.increase(ctx, &self.model, delta))
            .await
    }

    async fn delete_nodes(&self, ctx: &CallContext, provider_ids: &[String]) -> Result<()> {
        self.shared
            .guarded(
                self.shared
                    .controller
                    .delete_nodes(ctx, &self.model, provider_ids),
            )
            .await
    }

    async fn decrease_target_size(&self, _ctx: &CallContext, delta: i64) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared
            .controller
            .decrease_target_size(&self.model, delta)
    }

    async fn nodes(&self, ctx: &CallContext) -> Result<Vec<Node>> {
        self.shared
            .guarded(async {
                let snapshot = self.shared.snapshot(ctx).await?;
                Ok(self.model.nodes(&snapshot))
            })
            .await
    }

    async fn template_node_info(&self, ctx: &CallContext) -> Result<NodeTemplate> {
        self.shared
            .guarded(async {
                let snapshot = self.shared.snapshot(ctx).await?;
                self.model
                    .template(&snapshot, &self.shared.zone, self.shared.max_pods_per_node)
            })
            .await
    }

    fn exist(&self) -> bool {
        !self.shared.closed.load(Ordering::Acquire)
    }

    fn debug(&self) -> String {
        format!(
            "{} (min: {}, max: {}, pool: {})",
            self.id(),
            self.model.spec.min,
            self.model.spec.max,
            self.model.pool_ref
        )
    }
}

/// Cluster-autoscaler provider for one Exoscale zone.
pub struct ExoscaleProvider {
    shared: Arc<Shared>,
    groups: Vec<Arc<ExoscaleNodeGroup>>,
}

impl ExoscaleProvider {
    /// Load a snapshot and bind every configured group to its pool.
    pub async fn new(
        config: &ProviderConfig,
        api: Arc<dyn CloudApi>,
        ctx: &CallContext,
    ) -> Result<Self> {
        if api.zone() != &config.zone {
            return Err(Error::Config(format!(
                "api client targets zone {}, configuration names {}",
                api.zone(),
                config.zone
            )));
        }

        let cache = Arc::new(ResourceCache::new(
            api.clone(),
            config.cache_ttl,
            config.refresh_timeout,
        ));
        let snapshot = cache.refresh(ctx).await?;
        let models = bind_groups(&snapshot, &config.node_groups)?;

        let waiter = OperationWaiter::new(api.clone(), config.waiter.clone());
        let controller = PoolController::new(
            api,
            cache.clone(),
            waiter,
            ControllerConfig::from_provider(config),
        );
        let shared = Arc::new(Shared {
            zone: config.zone.clone(),
            cache,
            controller,
            max_pods_per_node: config.max_pods_per_node,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });
        let groups: Vec<Arc<ExoscaleNodeGroup>> = models
            .into_iter()
            .map(|model| {
                Arc::new(ExoscaleNodeGroup {
                    model,
                    shared: shared.clone(),
                })
            })
            .collect();

        info!(
            zone = %config.zone,
            groups = groups.len(),
            pools = snapshot.pools().count(),
            "exoscale provider ready"
        );
        Ok(Self { shared, groups })
    }

    /// Look a group up by its instance pool id.
    pub fn node_group(&self, id: &str) -> Option<Arc<dyn NodeGroup>> {
        self.groups
            .iter()
            .find(|g| g.id() == id)
            .map(|g| g.clone() as Arc<dyn NodeGroup>)
    }

    pub fn zone(&self) -> &Zone {
        &self.shared.zone
    }
}

#[async_trait]
impl CloudProvider for ExoscaleProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn node_groups(&self) -> Vec<Arc<dyn NodeGroup>> {
        self.groups
            .iter()
            .map(|g| g.clone() as Arc<dyn NodeGroup>)
            .collect()
    }

    async fn node_group_for_node(
        &self,
        ctx: &CallContext,
        provider_id: &str,
    ) -> Result<Option<Arc<dyn NodeGroup>>> {
        self.shared
            .guarded(async {
                let pid = ProviderId::parse(provider_id)?;
                let snapshot = self.shared.snapshot(ctx).await?;
                let pool_id = match resolve(&snapshot, &pid) {
                    Resolution::Member(instance) => instance.pool_id.clone(),
                    Resolution::Gone => None,
                };
                Ok(pool_id.and_then(|id| self.node_group(&id)))
            })
            .await
    }

    async fn refresh(&self, ctx: &CallContext) -> Result<()> {
        self.shared
            .guarded(async {
                let snapshot = self.shared.cache.refresh(ctx).await?;
                debug!(pools = snapshot.pools().count(), "provider refreshed");
                Ok(())
            })
            .await
    }

    fn gpu_label(&self) -> &str {
        GPU_LABEL
    }

    fn available_gpu_types(&self) -> BTreeSet<String> {
        GPU_TYPES.iter().map(|t| t.to_string()).collect()
    }

    async fn cleanup(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.shutdown.cancel();
        self.shared.cache.clear().await;
        self.shared.controller.clear();
        info!("exoscale provider cleaned up");
        Ok(())
    }
}

/// Resolve every spec to a pool in `snapshot`.
fn bind_groups(snapshot: &Snapshot, specs: &[NodeGroupSpec]) -> Result<Vec<GroupModel>> {
    let mut seen = HashSet::new();
    specs
        .iter()
        .map(|spec| {
            if spec.min > spec.max {
                return Err(Error::Config(format!(
                    "node group {}: min {} exceeds max {}",
                    spec.pool_id, spec.min, spec.max
                )));
            }
            let pool_id = snapshot.resolve_pool_id(&spec.pool_id).ok_or_else(|| {
                Error::Config(format!(
                    "node group {}: no instance pool or sks nodepool with this id",
                    spec.pool_id
                ))
            })?;
            if !seen.insert(pool_id.to_string()) {
                return Err(Error::Config(format!(
                    "node group {}: pool {pool_id} is already configured",
                    spec.pool_id
                )));
            }
            let pool_ref = snapshot.pool_ref(pool_id).cloned().ok_or_else(|| {
                Error::Config(format!("node group {}: pool {pool_id} has no reference", spec.pool_id))
            })?;
            Ok(GroupModel::new(
                NodeGroupSpec {
                    min: spec.min,
                    max: spec.max,
                    pool_id: pool_id.to_string(),
                },
                pool_ref,
            ))
        })
        .collect()
}
