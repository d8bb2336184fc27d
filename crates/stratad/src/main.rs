//! stratad — one strata cluster node.
//!
//! Runs either role:
//!   stratad rendezvous   — the well-known membership server
//!   stratad peer         — a store node that registers and serves keys

use anyhow::{bail, Context, Result};

use strata_core::config::StrataConfig;
use strata_services::{PeerNode, RendezvousServer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = StrataConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = StrataConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        StrataConfig::default()
    });

    let role = std::env::args().nth(1).unwrap_or_else(|| "peer".to_string());
    tracing::info!(role = %role, "stratad starting");

    match role.as_str() {
        "rendezvous" => run_rendezvous(&config).await,
        "peer" => run_peer(&config).await,
        other => bail!("unknown role: {other} (expected 'rendezvous' or 'peer')"),
    }
}

async fn run_rendezvous(config: &StrataConfig) -> Result<()> {
    let server = RendezvousServer::start(&config.cluster.rendezvous_addr)
        .await
        .context("failed to start rendezvous server")?;
    tracing::info!(addr = %server.addr(), "rendezvous serving");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("ctrl-c received, killing cluster");
    server.shutdown();
    Ok(())
}

async fn run_peer(config: &StrataConfig) -> Result<()> {
    let node = PeerNode::start(config)
        .await
        .context("failed to start peer node")?;
    tracing::info!(
        node = node.node_index(),
        addr = %node.local_addr(),
        "peer serving"
    );

    tokio::select! {
        _ = node.wait_shutdown() => {
            tracing::info!("node shut down");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            tracing::info!("ctrl-c received, shutting down");
            node.shutdown();
        }
    }
    Ok(())
}
