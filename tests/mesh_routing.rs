// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Multi-hop routing over a chain topology.

use std::sync::Arc;
use std::time::Duration;
use valhalla::mesh::router::{msg_type, Message, RouterError};
use valhalla::node::NodeError;
use valhalla::Network;

const PING: u16 = msg_type::PING;

async fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<valhalla::StackEvent>,
) -> Vec<valhalla::StackEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

#[tokio::test]
async fn ping_routes_across_a_six_node_chain() {
    let network = Network::new(6, 0).await.expect("network");
    network.connect_chain().await.expect("chain");

    let origin = network.node(0).unwrap().clone();
    let target = network.node(5).unwrap().clone();
    let origin_id = origin.node_id();
    let target_id = target.node_id();

    // Node 0 must not hold a direct connection to node 5.
    assert!(!origin.peers().contains(&target_id));

    let mut event_rxs: Vec<_> = (0..6)
        .map(|i| network.node(i).unwrap().events())
        .collect();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    target.register_message_handler(PING, {
        let tx = tx.clone();
        Arc::new(move |msg: &Message| {
            let _ = tx.send(msg.clone());
            None
        })
    });

    let mut msg = Message::new(PING, target_id, b"odin".to_vec());
    msg.ttl = 10;
    origin.send_message(msg).await.expect("send");

    let delivered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery timed out")
        .expect("handler channel");
    assert_eq!(delivered.from, origin_id);
    assert_eq!(delivered.payload, b"odin".to_vec());

    // Exactly one delivery.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err(), "handler invoked more than once");

    // Each intermediate router forwarded exactly once.
    for (i, event_rx) in event_rxs.iter_mut().enumerate().take(5).skip(1) {
        let events = drain_events(event_rx).await;
        let forwards = events
            .iter()
            .filter(|e| e.layer == "mesh" && e.kind == "route_forward")
            .count();
        assert_eq!(forwards, 1, "node {i} forwarded {forwards} times");
    }

    // The destination saw the message arrive.
    let events = drain_events(&mut event_rxs[5]).await;
    assert!(events
        .iter()
        .any(|e| e.layer == "mesh" && e.kind == "message_received"));

    network.shutdown().await;
}

#[tokio::test]
async fn ttl_one_reaches_a_direct_peer() {
    let network = Network::new(2, 0).await.expect("network");
    network.connect_pair(0, 1).await.expect("connect");

    let a = network.node(0).unwrap().clone();
    let b = network.node(1).unwrap().clone();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    b.register_message_handler(PING, {
        Arc::new(move |msg: &Message| {
            let _ = tx.send(msg.ttl);
            None
        })
    });

    let mut msg = Message::new(PING, b.node_id(), Vec::new());
    msg.ttl = 1;
    a.send_message(msg).await.expect("direct send with ttl 1");

    let ttl = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery")
        .expect("channel");
    assert_eq!(ttl, 1);

    network.shutdown().await;
}

#[tokio::test]
async fn ttl_one_fails_when_a_forward_is_needed() {
    let network = Network::new(3, 0).await.expect("network");
    network.connect_chain().await.expect("chain");

    let origin = network.node(0).unwrap().clone();
    let far = network.node(2).unwrap();

    let mut msg = Message::new(PING, far.node_id(), Vec::new());
    msg.ttl = 1;
    let err = origin.send_message(msg).await.expect_err("must expire");
    assert!(
        matches!(err, NodeError::Routing(RouterError::TtlExpired)),
        "got {err:?}"
    );

    network.shutdown().await;
}

#[tokio::test]
async fn unreachable_target_yields_no_route() {
    let network = Network::new(2, 0).await.expect("network");
    // No links at all; the only knowledge is the address book.
    let origin = network.node(0).unwrap().clone();
    let target = network.node(1).unwrap();

    let msg = Message::new(PING, target.node_id(), Vec::new());
    let err = origin.send_message(msg).await.expect_err("no route");
    assert!(
        matches!(err, NodeError::Routing(RouterError::NoRoute)),
        "got {err:?}"
    );

    network.shutdown().await;
}

#[tokio::test]
async fn ping_measures_a_round_trip() {
    let network = Network::new(2, 0).await.expect("network");
    network.connect_pair(0, 1).await.expect("connect");

    let a = network.node(0).unwrap().clone();
    let b = network.node(1).unwrap();

    let rtt = a.ping(&b.node_id()).await.expect("pong");
    assert!(rtt < Duration::from_secs(5));

    network.shutdown().await;
}

#[tokio::test]
async fn disconnect_pair_removes_both_sides() {
    let network = Network::new(2, 0).await.expect("network");
    network.connect_pair(0, 1).await.expect("connect");

    let a = network.node(0).unwrap().clone();
    let b = network.node(1).unwrap().clone();

    // Give the responder side time to register the session.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(a.peers().contains(&b.node_id()));
    assert!(b.peers().contains(&a.node_id()));

    network.disconnect_pair(0, 1).await.expect("disconnect");
    assert!(!a.peers().contains(&b.node_id()));
    assert!(!b.peers().contains(&a.node_id()));

    // Reconnect works after a disconnect.
    network.reconnect_pair(0, 1).await.expect("reconnect");
    assert!(a.peers().contains(&b.node_id()));

    network.shutdown().await;
}
