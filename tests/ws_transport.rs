// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! The WebSocket transport carries the same stack as TCP.

use std::sync::Arc;
use valhalla::node::{Node, NodeConfig};
use valhalla::types::PathAddr;

#[tokio::test]
async fn rpc_over_websocket_transport() {
    let a = Node::new(NodeConfig {
        listen_addr: PathAddr::ws("127.0.0.1:0"),
        ..NodeConfig::default()
    })
    .expect("node a");
    let b = Node::new(NodeConfig {
        listen_addr: PathAddr::ws("127.0.0.1:0"),
        ..NodeConfig::default()
    })
    .expect("node b");
    a.start().await.expect("start a");
    b.start().await.expect("start b");

    b.rpc_router().register_service(
        "echo",
        Arc::new(|_m: &str, args: &[u8], _f: &valhalla::NodeId| Ok(args.to_vec())),
    );

    a.connect_peer(b.peer_info()).await.expect("connect over ws");
    assert!(a.peers().contains(&b.node_id()));

    let response = a
        .send_rpc(&b.node_id(), "echo", "say", b"over websocket".to_vec())
        .await
        .expect("rpc");
    assert!(response.error.is_none());
    assert_eq!(response.data, b"over websocket".to_vec());

    a.stop().await;
    b.stop().await;
}
