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

//! Encrypted RPC and service discovery between connected nodes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use valhalla::types::{decode_canonical_limited, encode_canonical};
use valhalla::Network;

#[tokio::test]
async fn rpc_over_an_encrypted_session() {
    let network = Network::new(2, 0).await.expect("network");
    network.connect_pair(0, 1).await.expect("connect");

    let a = network.node(0).unwrap().clone();
    let b = network.node(1).unwrap().clone();

    b.rpc_router().register_service(
        "chat",
        Arc::new(|method: &str, _args: &[u8], _from: &valhalla::NodeId| {
            if method == "message" {
                Ok(b"delivered".to_vec())
            } else {
                Err(format!("unknown method: {method}"))
            }
        }),
    );

    let mut events_a = a.events();

    let response = a
        .send_rpc(&b.node_id(), "chat", "message", b"hello".to_vec())
        .await
        .expect("rpc");
    assert_eq!(response.data, b"delivered".to_vec());
    assert!(response.error.is_none());

    // The caller's flow layer sealed the request.
    let mut saw_encrypt = false;
    while let Ok(ev) = events_a.try_recv() {
        if ev.layer == "veil" && ev.kind == "encrypt" {
            saw_encrypt = true;
        }
    }
    assert!(saw_encrypt, "no veil/encrypt event observed on the caller");

    network.shutdown().await;
}

#[tokio::test]
async fn rpc_unknown_service_returns_an_error_response() {
    let network = Network::new(2, 0).await.expect("network");
    network.connect_pair(0, 1).await.expect("connect");

    let a = network.node(0).unwrap().clone();
    let b = network.node(1).unwrap();

    let response = a
        .send_rpc(&b.node_id(), "nope", "x", Vec::new())
        .await
        .expect("rpc completes");
    let err = response.error.expect("error populated");
    assert!(err.contains("unknown service"), "got {err}");

    network.shutdown().await;
}

#[tokio::test]
async fn rpc_handler_panic_is_contained() {
    let network = Network::new(2, 0).await.expect("network");
    network.connect_pair(0, 1).await.expect("connect");

    let a = network.node(0).unwrap().clone();
    let b = network.node(1).unwrap().clone();

    b.rpc_router().register_service(
        "bomb",
        Arc::new(|_m: &str, _a: &[u8], _f: &valhalla::NodeId| -> Result<Vec<u8>, String> {
            panic!("boom")
        }),
    );

    let response = a
        .send_rpc(&b.node_id(), "bomb", "go", Vec::new())
        .await
        .expect("dispatcher survives");
    assert!(response.error.is_some());

    // The node still serves afterwards.
    b.rpc_router().register_service(
        "echo",
        Arc::new(|_m: &str, args: &[u8], _f: &valhalla::NodeId| Ok(args.to_vec())),
    );
    let response = a
        .send_rpc(&b.node_id(), "echo", "say", b"still alive".to_vec())
        .await
        .expect("rpc after panic");
    assert_eq!(response.data, b"still alive".to_vec());

    network.shutdown().await;
}

#[tokio::test]
async fn service_discovery_and_call() {
    let network = Network::new(2, 0).await.expect("network");
    network.connect_pair(0, 1).await.expect("connect");

    let provider = network.node(0).unwrap().clone();
    let client = network.node(1).unwrap().clone();

    // Let the responder side finish registering the session.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let files = vec![
        "readme.md".to_string(),
        "config.json".to_string(),
        "data.bin".to_string(),
    ];
    let listing = encode_canonical(&files).expect("encode");

    provider
        .register_service("file-storage", BTreeMap::new(), {
            let listing = listing.clone();
            Arc::new(move |method: &str, _args: &[u8], _from: &valhalla::NodeId| {
                if method == "list" {
                    Ok(listing.clone())
                } else {
                    Err("unknown method".to_string())
                }
            })
        })
        .await
        .expect("register");

    // Discovery finds the provider across the wire.
    let records = client
        .intent()
        .find("file-storage")
        .await
        .expect("discovery");
    assert!(records.iter().any(|r| r.provider == provider.node_id()));

    let response = client
        .send_rpc(&provider.node_id(), "file-storage", "list", Vec::new())
        .await
        .expect("rpc");
    assert!(response.error.is_none());
    let got: Vec<String> =
        decode_canonical_limited(&response.data, 4096).expect("decode listing");
    assert_eq!(got, files);

    network.shutdown().await;
}

#[tokio::test]
async fn rpc_to_a_node_without_session_dials_on_demand() {
    let network = Network::new(2, 0).await.expect("network");
    // No connect_pair: the address book alone must be enough.

    let a = network.node(0).unwrap().clone();
    let b = network.node(1).unwrap().clone();

    b.rpc_router().register_service(
        "echo",
        Arc::new(|_m: &str, args: &[u8], _f: &valhalla::NodeId| Ok(args.to_vec())),
    );

    let response = tokio::time::timeout(
        Duration::from_secs(10),
        a.send_rpc(&b.node_id(), "echo", "say", b"knock".to_vec()),
    )
    .await
    .expect("timeout")
    .expect("rpc");
    assert_eq!(response.data, b"knock".to_vec());

    network.shutdown().await;
}
