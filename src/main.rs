//! Peg node
//!
//! Main entry point: loads the config, opens the node, then runs the status
//! poller and the RPC server until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use peg_core::config::NodeConfig;
use peg_core::constants::CLIENT_VERSION;
use peg_core::node::{GenesisInfo, Node, StatusPoller};
use peg_core::rpc::start_rpc_server;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => NodeConfig::load(&PathBuf::from(path))?,
        None => NodeConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = CLIENT_VERSION, network = config.network.name(), "starting peg node");

    let params = config.chain_params();
    let genesis = GenesisInfo::new(&params);
    info!(
        hash = %genesis.hash,
        merkle_root = %genesis.merkle_root,
        timestamp = genesis.timestamp,
        bits = %format!("0x{:08x}", genesis.bits),
        "genesis block"
    );

    let node = Arc::new(Node::open(&config)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = StatusPoller::new(node.clone(), Duration::from_millis(config.poll_interval_ms))
        .spawn(shutdown_rx.clone());
    let rpc = tokio::spawn(start_rpc_server(node.clone(), config.rpc_port, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    // Receivers may already be gone if the RPC server failed to bind.
    let _ = shutdown_tx.send(true);

    if let Err(err) = poller.await {
        error!(%err, "status poller task failed");
    }
    match rpc.await {
        Ok(Err(err)) => error!(%err, "RPC server failed"),
        Err(err) => error!(%err, "RPC task failed"),
        Ok(Ok(())) => {}
    }
    node.shutdown();
    Ok(())
}
