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

//! LWW register convergence under concurrent writes.

use valhalla::app::{LwwRegister, LwwStore};
use valhalla::types::NodeId;

fn id(byte: u8) -> NodeId {
    NodeId::from_bytes([byte; 32])
}

fn register(value: &[u8], ts: u64, writer: NodeId) -> LwwRegister {
    LwwRegister {
        value: value.to_vec(),
        timestamp_ms: ts,
        writer,
    }
}

#[test]
fn three_writers_converge_to_the_newest() {
    let a = LwwStore::new(id(1));
    let b = LwwStore::new(id(2));
    let c = LwwStore::new(id(3));

    a.set_with_timestamp("room/topic", register(b"from-a", 1000, id(1)));
    b.set_with_timestamp("room/topic", register(b"from-b", 500, id(2)));
    c.set_with_timestamp("room/topic", register(b"from-c", 2000, id(3)));

    // Pairwise merges in an arbitrary order.
    a.merge(&b.snapshot());
    b.merge(&a.snapshot());
    c.merge(&b.snapshot());
    b.merge(&c.snapshot());
    a.merge(&c.snapshot());
    c.merge(&a.snapshot());

    for store in [&a, &b, &c] {
        assert_eq!(store.get("room/topic"), Some(b"from-c".to_vec()));
        let reg = store.get_register("room/topic").unwrap();
        assert_eq!(reg.timestamp_ms, 2000);
        assert_eq!(reg.writer, id(3));
    }
}

#[test]
fn equal_timestamps_break_ties_on_writer_id() {
    let low = LwwStore::new(id(1));
    low.set_with_timestamp("k", register(b"low", 1000, id(1)));

    // Same timestamp, numerically greater writer wins.
    let applied = low.set_with_timestamp("k", register(b"high", 1000, id(9)));
    assert!(applied);
    assert_eq!(low.get("k"), Some(b"high".to_vec()));

    // Same timestamp, smaller writer loses.
    let applied = low.set_with_timestamp("k", register(b"lowest", 1000, id(0)));
    assert!(!applied);
    assert_eq!(low.get("k"), Some(b"high".to_vec()));
}

#[test]
fn merge_is_idempotent() {
    let a = LwwStore::new(id(1));
    let b = LwwStore::new(id(2));

    a.set_with_timestamp("x", register(b"ax", 100, id(1)));
    b.set_with_timestamp("x", register(b"bx", 200, id(2)));
    b.set_with_timestamp("y", register(b"by", 50, id(2)));

    let snapshot_b = b.snapshot();
    let first = a.merge(&snapshot_b);
    assert_eq!(first, 2);
    let again = a.merge(&snapshot_b);
    assert_eq!(again, 0, "second merge applies nothing");

    assert_eq!(a.get("x"), Some(b"bx".to_vec()));
    assert_eq!(a.get("y"), Some(b"by".to_vec()));
}

#[test]
fn merge_order_does_not_matter() {
    let mk = |order: &[u8]| {
        let store = LwwStore::new(id(42));
        let b = LwwStore::new(id(2));
        let c = LwwStore::new(id(3));
        b.set_with_timestamp("k", register(b"b", 300, id(2)));
        b.set_with_timestamp("only-b", register(b"ob", 10, id(2)));
        c.set_with_timestamp("k", register(b"c", 300, id(3)));
        c.set_with_timestamp("only-c", register(b"oc", 20, id(3)));
        for which in order {
            match which {
                2 => {
                    store.merge(&b.snapshot());
                }
                _ => {
                    store.merge(&c.snapshot());
                }
            }
        }
        store.snapshot()
    };

    let bc = mk(&[2, 3]);
    let cb = mk(&[3, 2]);
    assert_eq!(bc, cb);
    // Equal timestamps: writer id(3) > id(2).
    assert_eq!(bc.get("k").unwrap().value, b"c".to_vec());
}

#[tokio::test]
async fn crdt_writes_propagate_to_connected_peers() {
    let network = valhalla::Network::new(3, 0).await.expect("network");
    network.connect_chain().await.expect("chain");
    // Let the responder sides finish registering.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let writer = network.node(1).unwrap().clone();
    writer
        .crdt_set("room/topic", b"valhalla standup".to_vec())
        .await
        .expect("set");

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    // Direct peers of node 1 received the push; node 1 kept its own copy.
    for i in [0usize, 1, 2] {
        let node = network.node(i).unwrap();
        assert_eq!(
            node.crdt().get("room/topic"),
            Some(b"valhalla standup".to_vec()),
            "node {i} did not converge"
        );
    }

    network.shutdown().await;
}

#[test]
fn set_uses_the_clock_and_wins_over_older_writes() {
    let store = LwwStore::new(id(7));
    store.set_with_timestamp("key", register(b"old", 1, id(1)));
    store.set("key", b"new".to_vec());
    assert_eq!(store.get("key"), Some(b"new".to_vec()));
    assert_eq!(store.keys(), vec!["key".to_string()]);

    assert!(store.remove("key"));
    assert!(store.get("key").is_none());
    assert!(store.is_empty());
}
