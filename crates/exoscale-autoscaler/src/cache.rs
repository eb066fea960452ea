//! Resource cache — short-TTL snapshot of pools, instances, quotas and types.
//!
//! Readers share the installed snapshot through an `RwLock`. At most one
//! fetch runs at a time: the refresh slot is a FIFO `Mutex`, and callers
//! that queued behind an attempt reuse its outcome instead of fetching
//! again.
//!
//! # Concurrency model
//!
//! ```text
//! get()
//!   ├── fresh snapshot installed? ─────────────→ return it
//!   └── lock refresh slot (queue behind in-flight fetch)
//!       ├── fresh now? ─────────────────────────→ return it
//!       ├── an attempt failed after we queued? ─→ stale snapshot | Unavailable
//!       └── fetch all listings concurrently, install, return
//! ```
//!
//! A failed refresh never poisons the cache: the previous snapshot is
//! served with `stale = true`. Without any snapshot the call fails with
//! `Unavailable`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use exoscale_api::{
    ApiError, CallContext, CloudApi, Instance, InstanceId, InstanceType, ManagerFilter,
    ManagerKind, Pool, PoolId, PoolRef, Quota, SksCluster,
};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};

// ── Snapshot ───────────────────────────────────────────────────────

/// Immutable view of the zone at one instant.
#[derive(Debug)]
pub struct Snapshot {
    started_at: Instant,
    pools: BTreeMap<PoolId, Pool>,
    pool_refs: HashMap<PoolId, PoolRef>,
    /// SKS nodepool id → backing instance pool id.
    nodepools: HashMap<String, PoolId>,
    instances: HashMap<InstanceId, Instance>,
    /// Pool id → member ids, oldest first.
    members: HashMap<PoolId, Vec<InstanceId>>,
    quotas: BTreeMap<String, Quota>,
    instance_types: HashMap<String, InstanceType>,
}

impl Snapshot {
    pub fn build(
        started_at: Instant,
        pools: Vec<Pool>,
        clusters: Vec<SksCluster>,
        instances: Vec<Instance>,
        quotas: Vec<Quota>,
        instance_types: Vec<InstanceType>,
    ) -> Self {
        let mut nodepools = HashMap::new();
        let mut owners = HashMap::new();
        for cluster in &clusters {
            for np in &cluster.nodepools {
                nodepools.insert(np.id.clone(), np.instance_pool_id.clone());
                owners.insert(
                    np.instance_pool_id.clone(),
                    (cluster.id.clone(), np.id.clone()),
                );
            }
        }

        let pool_refs: HashMap<PoolId, PoolRef> = pools
            .iter()
            .map(|pool| {
                let sks_managed = pool
                    .manager
                    .as_ref()
                    .is_some_and(|m| m.kind == Some(ManagerKind::SksNodepool));
                let pool_ref = match owners.get(&pool.id) {
                    Some((cluster_id, nodepool_id)) => {
                        PoolRef::sks_nodepool(&pool.id, cluster_id, nodepool_id)
                    }
                    None => {
                        if sks_managed {
                            warn!(
                                pool_id = %pool.id,
                                "sks-managed pool has no owning cluster in listing; using instance pool endpoints"
                            );
                        }
                        PoolRef::instance_pool(&pool.id)
                    }
                };
                (pool.id.clone(), pool_ref)
            })
            .collect();

        let mut members: HashMap<PoolId, Vec<&Instance>> = HashMap::new();
        for instance in &instances {
            if let Some(pool_id) = &instance.pool_id {
                members.entry(pool_id.clone()).or_default().push(instance);
            }
        }
        let members: HashMap<PoolId, Vec<InstanceId>> = members
            .into_iter()
            .map(|(pool_id, mut list)| {
                list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
                (pool_id, list.into_iter().map(|i| i.id.clone()).collect())
            })
            .collect();

        Self {
            started_at,
            pools: pools.into_iter().map(|p| (p.id.clone(), p)).collect(),
            pool_refs,
            nodepools,
            instances: instances.into_iter().map(|i| (i.id.clone(), i)).collect(),
            members,
            quotas: quotas.into_iter().map(|q| (q.resource.clone(), q)).collect(),
            instance_types: instance_types
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect(),
        }
    }

    /// When the fetch that produced this snapshot started.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    pub fn pool(&self, id: &str) -> Option<&Pool> {
        self.pools.get(id)
    }

    pub fn pool_ref(&self, id: &str) -> Option<&PoolRef> {
        self.pool_refs.get(id)
    }

    /// Resolve an instance pool id or an SKS nodepool id to the instance
    /// pool id.
    pub fn resolve_pool_id<'a>(&'a self, id: &'a str) -> Option<&'a str> {
        if self.pools.contains_key(id) {
            return Some(id);
        }
        self.nodepools
            .get(id)
            .filter(|pool_id| self.pools.contains_key(pool_id.as_str()))
            .map(String::as_str)
    }

    pub fn instance(&self, id: &str) -> Option<&Instance> {
        self.instances.get(id)
    }

    /// Members of a pool, oldest first.
    pub fn members(&self, pool_id: &str) -> impl Iterator<Item = &Instance> {
        self.members
            .get(pool_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.instances.get(id))
    }

    pub fn quota(&self, resource: &str) -> Option<&Quota> {
        self.quotas.get(resource)
    }

    pub fn instance_type(&self, id: &str) -> Option<&InstanceType> {
        self.instance_types.get(id)
    }
}

/// A snapshot handed to a reader.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub snapshot: Arc<Snapshot>,
    /// The latest refresh failed; `snapshot` is older than the TTL allows.
    pub stale: bool,
    /// Why the latest refresh failed, when `stale`.
    pub error: Option<ApiError>,
}

impl CachedSnapshot {
    /// Mutations refuse stale data.
    pub fn require_fresh(self) -> Result<Arc<Snapshot>> {
        if self.stale {
            let cause = self
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "refresh failed".to_string());
            return Err(Error::Unavailable(format!(
                "snapshot is stale ({cause}); refusing to mutate"
            )));
        }
        Ok(self.snapshot)
    }
}

// ── Cache ──────────────────────────────────────────────────────────

#[derive(Debug)]
struct Installed {
    snapshot: Arc<Snapshot>,
    /// Set by `invalidate`; the snapshot stays around as a stale fallback.
    expired: bool,
}

#[derive(Debug)]
struct Attempt {
    error: Option<ApiError>,
}

#[derive(Debug, Default)]
struct RefreshSlot {
    last: Option<Attempt>,
}

pub struct ResourceCache {
    api: Arc<dyn CloudApi>,
    ttl: Duration,
    refresh_timeout: Duration,
    current: RwLock<Option<Installed>>,
    slot: Mutex<RefreshSlot>,
    /// Finished fetch attempts; bumped while holding the slot.
    attempts: AtomicU64,
}

impl ResourceCache {
    pub fn new(api: Arc<dyn CloudApi>, ttl: Duration, refresh_timeout: Duration) -> Self {
        Self {
            api,
            ttl,
            refresh_timeout,
            current: RwLock::new(None),
            slot: Mutex::new(RefreshSlot::default()),
            attempts: AtomicU64::new(0),
        }
    }

    /// Current snapshot, refreshing it when older than the TTL.
    pub async fn get(&self, ctx: &CallContext) -> Result<CachedSnapshot> {
        self.load(ctx, None).await
    }

    /// Force a fetch that starts no earlier than this call.
    ///
    /// Fails when the fetch fails, even if a stale snapshot exists.
    pub async fn refresh(&self, ctx: &CallContext) -> Result<Arc<Snapshot>> {
        let cached = self.load(ctx, Some(Instant::now())).await?;
        match cached.error {
            Some(e) if cached.stale => Err(Error::Api(e)),
            _ => Ok(cached.snapshot),
        }
    }

    /// Expire the installed snapshot after a mutation on `pool_id`.
    pub async fn invalidate(&self, pool_id: &str) {
        if let Some(installed) = self.current.write().await.as_mut() {
            installed.expired = true;
            debug!(%pool_id, "snapshot invalidated");
        }
    }

    /// Drop everything; the next read fetches from scratch.
    pub async fn clear(&self) {
        *self.current.write().await = None;
        self.slot.lock().await.last = None;
    }

    async fn fresh(&self, not_before: Option<Instant>) -> Option<Arc<Snapshot>> {
        let current = self.current.read().await;
        let installed = current.as_ref()?;
        let snapshot = &installed.snapshot;
        let fresh = !installed.expired
            && snapshot.started_at.elapsed() < self.ttl
            && not_before.is_none_or(|t| snapshot.started_at >= t);
        fresh.then(|| snapshot.clone())
    }

    async fn load(&self, ctx: &CallContext, not_before: Option<Instant>) -> Result<CachedSnapshot> {
        if let Some(snapshot) = self.fresh(not_before).await {
            debug!("snapshot cache hit");
            return Ok(CachedSnapshot {
                snapshot,
                stale: false,
                error: None,
            });
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let mut slot = ctx.run(async { Ok(self.slot.lock().await) }).await?;

        // Whoever held the slot may have done the work for us.
        if let Some(snapshot) = self.fresh(not_before).await {
            debug!("snapshot installed while queued");
            return Ok(CachedSnapshot {
                snapshot,
                stale: false,
                error: None,
            });
        }
        if self.attempts.load(Ordering::Acquire) > seen
            && let Some(attempt) = &slot.last
            && let Some(err) = &attempt.error
        {
            return self.fallback(err.clone()).await;
        }

        let started_at = Instant::now();
        let fetched = ctx
            .child(self.refresh_timeout)
            .run(self.fetch(started_at))
            .await;

        match fetched {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.current.write().await = Some(Installed {
                    snapshot: snapshot.clone(),
                    expired: false,
                });
                slot.last = Some(Attempt { error: None });
                self.attempts.fetch_add(1, Ordering::Release);
                debug!(
                    pools = snapshot.pools.len(),
                    instances = snapshot.instances.len(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "snapshot refreshed"
                );
                Ok(CachedSnapshot {
                    snapshot,
                    stale: false,
                    error: None,
                })
            }
            Err(ApiError::Canceled) => Err(Error::Api(ApiError::Canceled)),
            Err(e) => {
                slot.last = Some(Attempt {
                    error: Some(e.clone()),
                });
                self.attempts.fetch_add(1, Ordering::Release);
                drop(slot);
                self.fallback(e).await
            }
        }
    }

    async fn fallback(&self, err: ApiError) -> Result<CachedSnapshot> {
        match self.current.read().await.as_ref() {
            Some(installed) => {
                warn!(
                    error = %err,
                    age_ms = installed.snapshot.started_at.elapsed().as_millis() as u64,
                    "snapshot refresh failed; serving stale snapshot"
                );
                Ok(CachedSnapshot {
                    snapshot: installed.snapshot.clone(),
                    stale: true,
                    error: Some(err),
                })
            }
            None => Err(Error::Unavailable(format!(
                "no snapshot available: {err}"
            ))),
        }
    }

    async fn fetch(&self, started_at: Instant) -> exoscale_api::ApiResult<Snapshot> {
        let filter = ManagerFilter::instance_pools();
        let (pools, clusters, instances, quotas, types) = tokio::try_join!(
            self.api.list_pools(),
            self.api.list_sks_clusters(),
            self.api.list_instances(Some(&filter)),
            self.api.list_quotas(),
            self.api.list_instance_types(),
        )?;
        Ok(Snapshot::build(
            started_at, pools, clusters, instances, quotas, types,
        ))
    }
}
