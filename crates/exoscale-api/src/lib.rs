//! exoscale-api — typed façade over the Exoscale v2 compute API.
//!
//! Exposes exactly the calls the autoscaler needs, each one HTTP request
//! returning either a strict domain value or a typed [`ApiError`].
//!
//! # Architecture
//!
//! ```text
//! CloudApi (trait)
//!   ├── HttpCloudApi   hyper http1 + tokio-rustls, zone-scoped base URL
//!   │   ├── RequestSigner hook (ApiKeySigner: EXO2-HMAC-SHA256)
//!   │   └── wire models → domain types (missing field = Protocol)
//!   └── FakeCloud      in-memory, feature "fake"
//! ```
//!
//! Blocking entry points in dependent crates take a [`CallContext`] that
//! carries the caller's deadline and cancellation token.

pub mod client;
pub mod context;
pub mod error;
pub mod signer;
pub mod types;
mod wire;

#[cfg(feature = "fake")]
pub mod fake;

pub use client::{CloudApi, HttpCloudApi, HttpCloudApiBuilder};
pub use context::CallContext;
pub use error::{ApiError, ApiResult, ErrorKind};
pub use signer::{ApiKeySigner, NoopSigner, RequestSigner};
pub use types::*;
