//! Provider error types.

use std::fmt;

use exoscale_api::{ApiError, ErrorKind, PoolId};
use thiserror::Error;

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Mutation attempted on a pool, recorded on enriched errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolAction {
    Increase,
    DeleteNodes,
    DecreaseTargetSize,
}

impl PoolAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolAction::Increase => "increase",
            PoolAction::DeleteNodes => "delete-nodes",
            PoolAction::DecreaseTargetSize => "decrease-target-size",
        }
    }
}

impl fmt::Display for PoolAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced to the autoscaler.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{action} on pool {pool_id}: {source}")]
    Pool {
        pool_id: PoolId,
        action: PoolAction,
        #[source]
        source: Box<Error>,
    },

    #[error("node group {group}: {reason}")]
    OutOfRange { group: String, reason: String },

    #[error("quota exceeded for {resource}: usage {usage} + {requested} > limit {limit}")]
    Quota {
        resource: String,
        usage: i64,
        requested: i64,
        limit: i64,
    },

    #[error("node {provider_id} does not belong to node group {group}")]
    NodeNotFound { provider_id: String, group: String },

    #[error("pool {pool_id} is busy (state {state})")]
    Busy { pool_id: PoolId, state: String },

    #[error("pool {pool_id} refuses mutations in state {state}")]
    Conflict { pool_id: PoolId, state: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid provider id {input:?}: {reason}")]
    Format { input: String, reason: String },

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Api(e) => e.kind(),
            Error::Pool { source, .. } => source.kind(),
            Error::OutOfRange { .. } => ErrorKind::OutOfRange,
            Error::Quota { .. } => ErrorKind::Quota,
            Error::NodeNotFound { .. } => ErrorKind::NotFound,
            Error::Busy { .. } => ErrorKind::Busy,
            Error::Conflict { .. } | Error::Unsupported(_) => ErrorKind::Conflict,
            Error::Format { .. } => ErrorKind::Format,
            Error::Unavailable(_) => ErrorKind::Unavailable,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind().is_retriable()
    }

    /// Attach the pool and attempted action. Already-enriched errors are
    /// returned unchanged.
    pub fn in_pool(self, pool_id: &str, action: PoolAction) -> Self {
        match self {
            e @ Error::Pool { .. } => e,
            e => Error::Pool {
                pool_id: pool_id.to_string(),
                action,
                source: Box::new(e),
            },
        }
    }

    /// The innermost error, with pool enrichment peeled off.
    pub fn root(&self) -> &Error {
        match self {
            Error::Pool { source, .. } => source.root(),
            e => e,
        }
    }
}
