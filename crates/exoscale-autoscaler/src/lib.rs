//! exoscale-autoscaler — cluster-autoscaler cloud provider for Exoscale.
//!
//! Maps autoscaler node groups onto Exoscale instance pools (bare or owned
//! by SKS nodepools), keeps a short-lived snapshot of the zone, and turns
//! scale decisions into validated, serialized pool mutations.
//!
//! # Architecture
//!
//! ```text
//! CloudProvider / NodeGroup (autoscaler contract)
//!   └── ExoscaleProvider
//!       ├── ResourceCache    TTL snapshot, single-flight refresh
//!       ├── PoolController   per-pool FIFO lock, bounds, quota, readiness
//!       │   └── OperationWaiter  polls cloud operations to terminal state
//!       ├── GroupModel       readiness, nodes, template node
//!       └── ProviderId       exoscale://<uuid> ↔ instance id
//!             │
//!             ▼
//!       exoscale_api::CloudApi
//! ```
//!
//! The adapter never retries a failed mutation; the autoscaler's loop is
//! the retry mechanism.

pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod identity;
pub mod node_group;
pub mod provider;
pub mod waiter;

pub use cache::{CachedSnapshot, ResourceCache, Snapshot};
pub use config::{Credentials, NodeGroupSpec, ProviderConfig};
pub use controller::{ControllerConfig, PoolController};
pub use error::{Error, PoolAction, Result};
pub use identity::{PROVIDER_ID_SCHEME, ProviderId, Resolution};
pub use node_group::{GroupModel, Node, NodeStatus, NodeTemplate, Readiness};
pub use provider::{CloudProvider, ExoscaleNodeGroup, ExoscaleProvider, NodeGroup};
pub use waiter::{OperationWaiter, WaiterConfig};
