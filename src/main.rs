#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Valhalla demo entrypoint: boots a small in-process network, publishes a
//! piece of content, and logs stack events until interrupted.

use std::collections::BTreeMap;
use tracing::{info, warn};
use valhalla::Network;

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    let count: usize = env("VALHALLA_NODES", "3").parse().unwrap_or(3);
    let base_port: u16 = env("VALHALLA_BASE_PORT", "0").parse().unwrap_or(0);

    let network = Network::new(count, base_port).await?;
    network.connect_chain().await?;
    info!(nodes = count, "network up");

    for state in network.all_node_info() {
        info!(id = %state.short_id, addr = ?state.listen_addr, "node");
    }

    // Log node 0's event stream in the background.
    if let Some(node) = network.node(0) {
        let mut events = node.events();
        tokio::spawn(async move {
            while let Ok(ev) = events.recv().await {
                info!(layer = %ev.layer, kind = %ev.kind, detail = ?ev.detail, "event");
            }
        });
    }

    if let Some(node) = network.node(0) {
        let mut metadata = BTreeMap::new();
        metadata.insert("title".to_string(), "greeting".to_string());
        match node.publish_content(b"The Valhalla Protocol".to_vec(), metadata).await {
            Ok(envelope) => info!(cid = %envelope.cid, "content published"),
            Err(e) => warn!(err = %e, "publish failed"),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    network.shutdown().await;
    Ok(())
}
