#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Orbitfs node entrypoint (systemd-friendly).
//! Starts the node, bootstraps configured peers and serves until SIGINT.

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use orbitfs::core::types::NodeConfig;
use orbitfs::networking::node::Node;

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn load_config() -> Result<NodeConfig> {
    if let Some(path) = std::env::args().nth(1) {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {path:?}"))?;
        return toml::from_str(&raw).with_context(|| format!("parsing config {path:?}"));
    }

    let mut config = NodeConfig::with_path(env("ORBITFS_DATA_DIR", "./data"));
    config.listen_addr = env("ORBITFS_LISTEN", "0.0.0.0:8045");
    config.bootstrap = env("ORBITFS_BOOTSTRAP", "")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .try_init();

    let config = load_config()?;
    let bootstrap = config.bootstrap.clone();

    let node = Node::new(config)?;
    let addr = node.listen().await?;
    info!(%addr, id = node.id(), "orbitfs node started");

    // Bootstrap failures are reported once; the node serves regardless.
    for peer_addr in bootstrap {
        if let Err(e) = node.bootstrap_add_node(&peer_addr).await {
            warn!(addr = %peer_addr, err = %e, "bootstrap failed");
        }
    }

    tokio::signal::ctrl_c().await?;
    node.close();
    Ok(())
}
