//! Wire models for the Exoscale v2 JSON API.
//!
//! Almost every field on the wire is optional. Conversion into the domain
//! types in [`crate::types`] enforces the fields the autoscaler depends on;
//! a missing required field is an [`ApiError::Protocol`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::types::*;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct IdRef {
    pub id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireManager {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

// ── Instance pools ─────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct WireInstancePool {
    pub id: Option<String>,
    pub name: Option<String>,
    pub size: Option<i64>,
    pub state: Option<String>,
    pub instance_type: Option<IdRef>,
    pub instances: Option<Vec<IdRef>>,
    pub manager: Option<WireManager>,
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ListInstancePoolsResponse {
    pub instance_pools: Option<Vec<WireInstancePool>>,
}

impl TryFrom<WireInstancePool> for Pool {
    type Error = ApiError;

    fn try_from(w: WireInstancePool) -> ApiResult<Self> {
        let id = required(w.id, "instance-pool", "id")?;
        let size = required(w.size, "instance-pool", "size")?;
        let size = u64::try_from(size)
            .map_err(|_| ApiError::Protocol(format!("instance-pool {id}: negative size {size}")))?;
        let state = required(w.state, "instance-pool", "state")?;
        let instance_type_id = required(
            w.instance_type.and_then(|t| t.id),
            "instance-pool",
            "instance-type.id",
        )?;

        Ok(Pool {
            name: w.name.unwrap_or_default(),
            size,
            state: PoolState::parse(&state),
            instance_type_id,
            instance_ids: w
                .instances
                .unwrap_or_default()
                .into_iter()
                .filter_map(|i| i.id)
                .collect(),
            manager: w.manager.and_then(manager_from_wire),
            labels: w.labels.unwrap_or_default(),
            id,
        })
    }
}

// ── SKS clusters ───────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct WireSksNodepool {
    pub id: Option<String>,
    pub name: Option<String>,
    pub instance_pool: Option<IdRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct WireSksCluster {
    pub id: Option<String>,
    pub name: Option<String>,
    pub nodepools: Option<Vec<WireSksNodepool>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ListSksClustersResponse {
    pub sks_clusters: Option<Vec<WireSksCluster>>,
}

impl TryFrom<WireSksCluster> for SksCluster {
    type Error = ApiError;

    fn try_from(w: WireSksCluster) -> ApiResult<Self> {
        let id = required(w.id, "sks-cluster", "id")?;
        let nodepools = w
            .nodepools
            .unwrap_or_default()
            .into_iter()
            .map(|np| {
                Ok(SksNodepool {
                    id: required(np.id, "sks-nodepool", "id")?,
                    name: np.name.unwrap_or_default(),
                    instance_pool_id: required(
                        np.instance_pool.and_then(|p| p.id),
                        "sks-nodepool",
                        "instance-pool.id",
                    )?,
                })
            })
            .collect::<ApiResult<Vec<_>>>()?;

        Ok(SksCluster {
            id,
            name: w.name.unwrap_or_default(),
            nodepools,
        })
    }
}

// ── Instances ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct WireInstance {
    pub id: Option<String>,
    pub name: Option<String>,
    pub state: Option<String>,
    pub manager: Option<WireManager>,
    pub instance_type: Option<IdRef>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListInstancesResponse {
    pub instances: Option<Vec<WireInstance>>,
}

impl TryFrom<WireInstance> for Instance {
    type Error = ApiError;

    fn try_from(w: WireInstance) -> ApiResult<Self> {
        let id = required(w.id, "instance", "id")?;
        let state = required(w.state, "instance", "state")?;
        let pool_id = w
            .manager
            .and_then(manager_from_wire)
            .filter(|m| m.kind == Some(ManagerKind::InstancePool))
            .map(|m| m.id);

        Ok(Instance {
            id,
            name: w.name.unwrap_or_default(),
            state: InstanceState::parse(&state),
            pool_id,
            instance_type_id: w.instance_type.and_then(|t| t.id),
            created_at: w.created_at,
        })
    }
}

// ── Operations ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireReference {
    pub id: Option<String>,
    pub link: Option<String>,
    pub command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireOperation {
    pub id: Option<String>,
    pub state: Option<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub reference: Option<WireReference>,
}

/// Async actions answer either with a bare operation or with
/// `{"operation": {...}}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OperationEnvelope {
    Wrapped { operation: WireOperation },
    Bare(WireOperation),
}

impl OperationEnvelope {
    pub fn into_inner(self) -> WireOperation {
        match self {
            OperationEnvelope::Wrapped { operation } => operation,
            OperationEnvelope::Bare(operation) => operation,
        }
    }
}

impl TryFrom<WireOperation> for Operation {
    type Error = ApiError;

    fn try_from(w: WireOperation) -> ApiResult<Self> {
        let id = required(w.id, "operation", "id")?;
        let raw_state = required(w.state, "operation", "state")?;
        let state = OperationState::parse(&raw_state).ok_or_else(|| {
            ApiError::Protocol(format!("operation {id}: unknown state {raw_state:?}"))
        })?;

        Ok(Operation {
            id,
            state,
            reason: w.reason,
            message: w.message,
            reference: w.reference.map(|r| OperationReference {
                id: r.id,
                link: r.link,
                command: r.command,
            }),
        })
    }
}

// ── Quotas & instance types ────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireQuota {
    pub resource: Option<String>,
    pub usage: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuotasResponse {
    pub quotas: Option<Vec<WireQuota>>,
}

impl TryFrom<WireQuota> for Quota {
    type Error = ApiError;

    fn try_from(w: WireQuota) -> ApiResult<Self> {
        Ok(Quota {
            resource: required(w.resource, "quota", "resource")?,
            usage: required(w.usage, "quota", "usage")?,
            limit: required(w.limit, "quota", "limit")?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireInstanceType {
    pub id: Option<String>,
    pub family: Option<String>,
    pub size: Option<String>,
    pub cpus: Option<i64>,
    pub memory: Option<i64>,
    pub gpus: Option<i64>,
    pub authorized: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ListInstanceTypesResponse {
    pub instance_types: Option<Vec<WireInstanceType>>,
}

impl TryFrom<WireInstanceType> for InstanceType {
    type Error = ApiError;

    fn try_from(w: WireInstanceType) -> ApiResult<Self> {
        Ok(InstanceType {
            id: required(w.id, "instance-type", "id")?,
            family: w.family.unwrap_or_default(),
            size: w.size.unwrap_or_default(),
            cpus: required(w.cpus, "instance-type", "cpus")?,
            memory: required(w.memory, "instance-type", "memory")?,
            gpus: w.gpus.unwrap_or(0),
            authorized: w.authorized.unwrap_or(true),
        })
    }
}

// ── Request bodies ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct ScaleRequest {
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct EvictRequest<'a> {
    pub instances: &'a [InstanceId],
}

// ── Helpers ────────────────────────────────────────────────────────

fn required<T>(value: Option<T>, entity: &str, field: &str) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::Protocol(format!("{entity}: missing required field {field:?}")))
}

fn manager_from_wire(m: WireManager) -> Option<Manager> {
    let id = m.id?;
    Some(Manager {
        id,
        kind: m.kind.as_deref().and_then(ManagerKind::parse),
    })
}

/// Convert a list of wire items, failing on the first invalid one.
pub(crate) fn convert_all<W, T>(items: Option<Vec<W>>) -> ApiResult<Vec<T>>
where
    T: TryFrom<W, Error = ApiError>,
{
    items
        .unwrap_or_default()
        .into_iter()
        .map(T::try_from)
        .collect()
}
