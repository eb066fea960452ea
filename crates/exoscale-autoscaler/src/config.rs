//! Provider configuration.
//!
//! Loaded from a TOML file. `EXOSCALE_ZONE`, `EXOSCALE_API_KEY` and
//! `EXOSCALE_API_SECRET` override the file. Durations are strings such as
//! `"30s"`, `"500ms"` or `"10m"`.
//!
//! ```toml
//! zone = "ch-gva-2"
//! api_key = "EXO..."
//! api_secret = "..."
//! node_groups = ["1:5:4f9c6a1e-...", "0:3:np-8d2e..."]
//! cache_ttl = "30s"
//! eviction_managers = ["sks-nodepool"]
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use exoscale_api::{ManagerKind, Zone};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::waiter::WaiterConfig;

pub const ENV_ZONE: &str = "EXOSCALE_ZONE";
pub const ENV_API_KEY: &str = "EXOSCALE_API_KEY";
pub const ENV_API_SECRET: &str = "EXOSCALE_API_SECRET";

/// On-disk shape. Every field is optional; [`ProviderConfig`] applies
/// defaults and validation.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ConfigFile {
    pub zone: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub node_groups: Vec<String>,
    pub cache_ttl: Option<String>,
    pub op_poll_interval: Option<String>,
    pub op_poll_max: Option<String>,
    pub op_failure_budget: Option<u32>,
    pub request_timeout: Option<String>,
    pub refresh_timeout: Option<String>,
    pub scale_timeout: Option<String>,
    pub delete_timeout: Option<String>,
    pub delete_concurrency: Option<usize>,
    pub max_pods_per_node: Option<u32>,
    pub eviction_managers: Option<Vec<String>>,
}

/// API key pair feeding the request signer.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// One `<min>:<max>:<poolId>` group spec. The pool id may name an instance
/// pool or an SKS nodepool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGroupSpec {
    pub min: u64,
    pub max: u64,
    pub pool_id: String,
}

impl FromStr for NodeGroupSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::Config(format!("node group spec {s:?}: {reason}"));

        let mut parts = s.splitn(3, ':');
        let (Some(min), Some(max), Some(pool_id)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected <min>:<max>:<poolId>"));
        };
        let min: u64 = min
            .trim()
            .parse()
            .map_err(|_| invalid("min is not a non-negative integer"))?;
        let max: u64 = max
            .trim()
            .parse()
            .map_err(|_| invalid("max is not a non-negative integer"))?;
        let pool_id = pool_id.trim();
        if pool_id.is_empty() {
            return Err(invalid("empty pool id"));
        }
        if min > max {
            return Err(invalid("min exceeds max"));
        }

        Ok(Self {
            min,
            max,
            pool_id: pool_id.to_string(),
        })
    }
}

/// Validated provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub zone: Zone,
    pub credentials: Credentials,
    /// Overrides the zone-derived API endpoint.
    pub endpoint: Option<String>,
    pub node_groups: Vec<NodeGroupSpec>,
    pub cache_ttl: Duration,
    pub waiter: WaiterConfig,
    pub request_timeout: Duration,
    pub refresh_timeout: Duration,
    pub scale_timeout: Duration,
    pub delete_timeout: Duration,
    pub delete_concurrency: usize,
    pub max_pods_per_node: u32,
    /// Manager kinds whose pools accept targeted eviction.
    pub eviction_managers: Vec<ManagerKind>,
}

impl ProviderConfig {
    /// Defaults for everything but zone, credentials and groups.
    pub fn new(zone: Zone, credentials: Credentials, node_groups: Vec<NodeGroupSpec>) -> Self {
        Self {
            zone,
            credentials,
            endpoint: None,
            node_groups,
            cache_ttl: Duration::from_secs(30),
            waiter: WaiterConfig::default(),
            request_timeout: Duration::from_secs(30),
            refresh_timeout: Duration::from_secs(30),
            scale_timeout: Duration::from_secs(600),
            delete_timeout: Duration::from_secs(120),
            delete_concurrency: 8,
            max_pods_per_node: 110,
            eviction_managers: vec![ManagerKind::SksNodepool, ManagerKind::InstancePool],
        }
    }

    /// Read a TOML file and apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&content, |key| std::env::var(key).ok())
    }

    /// Parse TOML, looking environment overrides up through `env`.
    pub fn from_toml_str(content: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("invalid toml: {e}")))?;
        Self::from_parts(file, env)
    }

    pub fn from_parts(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let pick = |var: &str, value: Option<String>, name: &str| -> Result<String> {
            env(var)
                .filter(|v| !v.is_empty())
                .or(value)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::Config(format!("{name} is required (or set {var})")))
        };

        let zone = Zone::new(pick(ENV_ZONE, file.zone, "zone")?);
        let credentials = Credentials {
            api_key: pick(ENV_API_KEY, file.api_key, "api_key")?,
            api_secret: pick(ENV_API_SECRET, file.api_secret, "api_secret")?,
        };
        let node_groups = file
            .node_groups
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<NodeGroupSpec>>>()?;

        let mut config = Self::new(zone, credentials, node_groups);
        config.endpoint = file.endpoint.filter(|e| !e.is_empty());

        set_duration(&mut config.cache_ttl, "cache_ttl", &file.cache_ttl)?;
        set_duration(&mut config.waiter.poll_interval, "op_poll_interval", &file.op_poll_interval)?;
        set_duration(&mut config.waiter.poll_max, "op_poll_max", &file.op_poll_max)?;
        set_duration(&mut config.request_timeout, "request_timeout", &file.request_timeout)?;
        set_duration(&mut config.refresh_timeout, "refresh_timeout", &file.refresh_timeout)?;
        set_duration(&mut config.scale_timeout, "scale_timeout", &file.scale_timeout)?;
        set_duration(&mut config.delete_timeout, "delete_timeout", &file.delete_timeout)?;

        if let Some(budget) = file.op_failure_budget {
            config.waiter.failure_budget = budget;
        }
        if let Some(k) = file.delete_concurrency {
            if k == 0 {
                return Err(Error::Config("delete_concurrency must be at least 1".into()));
            }
            config.delete_concurrency = k;
        }
        if let Some(pods) = file.max_pods_per_node {
            config.max_pods_per_node = pods;
        }
        if let Some(kinds) = file.eviction_managers {
            config.eviction_managers = kinds
                .iter()
                .map(|k| {
                    ManagerKind::parse(k)
                        .ok_or_else(|| Error::Config(format!("unknown eviction manager {k:?}")))
                })
                .collect::<Result<_>>()?;
        }
        if config.waiter.poll_max < config.waiter.poll_interval {
            return Err(Error::Config("op_poll_max is shorter than op_poll_interval".into()));
        }

        Ok(config)
    }
}

fn set_duration(target: &mut Duration, key: &str, value: &Option<String>) -> Result<()> {
    if let Some(raw) = value {
        *target = parse_duration(raw)
            .ok_or_else(|| Error::Config(format!("{key}: invalid duration {raw:?}")))?;
    }
    Ok(())
}

/// Parse `"500ms"`, `"30s"`, `"10m"`, `"1h"`; a bare number means seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
