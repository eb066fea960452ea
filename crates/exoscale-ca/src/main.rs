//! exoscale-ca — operator CLI for the Exoscale autoscaler provider.
//!
//! Loads the provider configuration, binds the configured node groups and
//! runs one of:
//! - `status`: print every group's bounds, target size and members
//! - `watch`: refresh on an interval and log group sizes until Ctrl-C
//! - `increase`: grow one group by a delta
//! - `delete`: remove named nodes from one group
//!
//! # Usage
//!
//! ```text
//! exoscale-ca --config /etc/exoscale-ca.toml status --json
//! exoscale-ca --config /etc/exoscale-ca.toml increase 4f9c6a1e-... 2
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use exoscale_api::{ApiKeySigner, CallContext, CloudApi, HttpCloudApi};
use exoscale_autoscaler::{CloudProvider, ExoscaleProvider, NodeGroup, ProviderConfig};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_FILTER: &str = "info,exoscale_autoscaler=debug";

#[derive(Parser)]
#[command(name = "exoscale-ca", about = "Exoscale cluster-autoscaler provider")]
struct Cli {
    /// Provider configuration file (TOML).
    #[arg(long, short, default_value = "/etc/exoscale-ca.toml")]
    config: PathBuf,

    /// Overall deadline for one command, in seconds. Does not apply to `watch`.
    #[arg(long, default_value = "900")]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configured node groups and their members.
    Status {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Refresh periodically and log group sizes.
    Watch {
        /// Refresh interval in seconds.
        #[arg(long, default_value = "10")]
        interval: u64,
    },
    /// Grow a node group.
    Increase {
        /// Instance pool id of the group.
        group: String,
        delta: u64,
    },
    /// Delete nodes from a node group.
    Delete {
        /// Instance pool id of the group.
        group: String,
        /// Provider ids (`exoscale://<uuid>`).
        #[arg(required = true)]
        nodes: Vec<String>,
    },
}

#[derive(Serialize)]
struct GroupStatus {
    id: String,
    min: u64,
    max: u64,
    target: u64,
    nodes: Vec<NodeStatusLine>,
}

#[derive(Serialize)]
struct NodeStatusLine {
    provider_id: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let config = ProviderConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let api = build_api(&config)?;

    let ctx = match cli.command {
        Command::Watch { .. } => CallContext::background(),
        _ => CallContext::with_timeout(Duration::from_secs(cli.timeout)),
    };
    let provider = ExoscaleProvider::new(&config, api, &ctx)
        .await
        .context("binding node groups")?;

    let result = match cli.command {
        Command::Status { json } => status(&provider, &ctx, json).await,
        Command::Watch { interval } => watch_groups(&provider, Duration::from_secs(interval)).await,
        Command::Increase { group, delta } => {
            let group = find_group(&provider, &group)?;
            group.increase_size(&ctx, delta).await?;
            info!(group = %group.id(), delta, "increase finished");
            Ok(())
        }
        Command::Delete { group, nodes } => {
            let group = find_group(&provider, &group)?;
            group.delete_nodes(&ctx, &nodes).await?;
            info!(group = %group.id(), count = nodes.len(), "delete finished");
            Ok(())
        }
    };

    provider.cleanup().await?;
    result
}

fn build_api(config: &ProviderConfig) -> anyhow::Result<Arc<dyn CloudApi>> {
    let signer = Arc::new(ApiKeySigner::new(
        config.credentials.api_key.clone(),
        config.credentials.api_secret.clone(),
    ));
    let mut builder = HttpCloudApi::builder(config.zone.clone())
        .signer(signer)
        .request_timeout(config.request_timeout);
    if let Some(endpoint) = &config.endpoint {
        builder = builder.endpoint(endpoint.clone());
    }
    Ok(Arc::new(builder.build()?))
}

fn find_group(provider: &ExoscaleProvider, id: &str) -> anyhow::Result<Arc<dyn NodeGroup>> {
    provider
        .node_group(id)
        .with_context(|| format!("no configured node group for pool {id}"))
}

async fn collect_status(
    provider: &ExoscaleProvider,
    ctx: &CallContext,
) -> anyhow::Result<Vec<GroupStatus>> {
    let mut out = Vec::new();
    for group in provider.node_groups() {
        let nodes = group
            .nodes(ctx)
            .await?
            .into_iter()
            .map(|n| NodeStatusLine {
                provider_id: n.provider_id.to_string(),
                status: n.status.to_string(),
                error: n.error,
            })
            .collect();
        out.push(GroupStatus {
            id: group.id().to_string(),
            min: group.min_size(),
            max: group.max_size(),
            target: group.target_size(ctx).await?,
            nodes,
        });
    }
    Ok(out)
}

async fn status(provider: &ExoscaleProvider, ctx: &CallContext, json: bool) -> anyhow::Result<()> {
    let groups = collect_status(provider, ctx).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    println!("zone {}", provider.zone());
    for g in &groups {
        println!(
            "{}  min={} max={} target={} nodes={}",
            g.id,
            g.min,
            g.max,
            g.target,
            g.nodes.len()
        );
        for n in &g.nodes {
            match &n.error {
                Some(e) => println!("  {}  {}  ({e})", n.provider_id, n.status),
                None => println!("  {}  {}", n.provider_id, n.status),
            }
        }
    }
    Ok(())
}

async fn watch_groups(provider: &ExoscaleProvider, interval: Duration) -> anyhow::Result<()> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let cancel = CancellationToken::new();
    let ctx = CallContext::background().with_cancel(cancel.clone());

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown signal received");
        cancel.cancel();
        let _ = shutdown_tx.send(true);
    });

    info!(interval_secs = interval.as_secs(), "watching node groups");
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => break,
        }

        if let Err(e) = provider.refresh(&ctx).await {
            warn!(error = %e, retriable = e.is_retriable(), "refresh failed");
            continue;
        }
        match collect_status(provider, &ctx).await {
            Ok(groups) => {
                for g in groups {
                    info!(
                        group = %g.id,
                        target = g.target,
                        nodes = g.nodes.len(),
                        min = g.min,
                        max = g.max,
                        "node group"
                    );
                }
            }
            Err(e) => warn!(error = %e, "status collection failed"),
        }
    }

    info!("watch stopped");
    Ok(())
}
