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

//! Content publish/retrieve and cache behavior.

use std::collections::BTreeMap;
use std::time::Duration;
use valhalla::intent::{Cid, ContentCache, ContentEnvelope, EnvelopeError};
use valhalla::mesh::identity::Identity;
use valhalla::types::sha256;
use valhalla::Network;

#[tokio::test]
async fn publish_and_retrieve_across_nodes() {
    let network = Network::new(2, 0).await.expect("network");
    network.connect_pair(0, 1).await.expect("connect");

    let publisher = network.node(0).unwrap().clone();
    let retriever = network.node(1).unwrap().clone();

    let data = b"The Valhalla Protocol".to_vec();
    let mut metadata = BTreeMap::new();
    metadata.insert("title".to_string(), "x".to_string());

    let envelope = publisher
        .publish_content(data.clone(), metadata)
        .await
        .expect("publish");

    // CID is the multihash of the data.
    let digest = sha256(&data);
    let bytes = envelope.cid.as_bytes();
    assert_eq!(bytes[0], 0x12);
    assert_eq!(bytes[1], 0x20);
    assert_eq!(&bytes[2..], &digest);
    assert_eq!(envelope.cid, Cid::compute(&data));

    // Let the provider record reach the retriever.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let fetched = retriever
        .get_content(&envelope.cid)
        .await
        .expect("want")
        .expect("content found");
    assert_eq!(fetched.data, data);
    assert_eq!(fetched.publisher, publisher.node_id());
    fetched.verify().expect("envelope verifies");

    // A second lookup is a cache hit on the retriever.
    assert!(retriever.cache().contains(&envelope.cid));

    network.shutdown().await;
}

#[tokio::test]
async fn tampered_envelopes_are_rejected() {
    let identity = Identity::generate().expect("identity");
    let envelope =
        ContentEnvelope::create(&identity, b"payload".to_vec(), BTreeMap::new());
    envelope.verify().expect("fresh envelope verifies");

    // Data tampering breaks the CID binding.
    let mut tampered = envelope.clone();
    tampered.data = b"payloax".to_vec();
    assert_eq!(tampered.verify(), Err(EnvelopeError::CidMismatch));

    // Re-pointing the CID at the new data breaks the signature instead.
    tampered.cid = Cid::compute(&tampered.data);
    assert_eq!(tampered.verify(), Err(EnvelopeError::BadSignature));

    // A different claimed publisher breaks the key binding.
    let other = Identity::generate().expect("identity");
    let mut forged = envelope.clone();
    forged.publisher = other.node_id();
    assert_eq!(forged.verify(), Err(EnvelopeError::BadPublisher));
}

#[test]
fn cache_evicts_least_recently_used() {
    let identity = Identity::generate().expect("identity");
    let cache = ContentCache::new(3);

    let envelopes: Vec<ContentEnvelope> = (0u8..4)
        .map(|i| ContentEnvelope::create(&identity, vec![i; 8], BTreeMap::new()))
        .collect();

    for env in envelopes.iter().take(3) {
        cache.insert(env.clone());
    }
    assert_eq!(cache.len(), 3);

    // Touch the first entry so the second becomes LRU.
    assert!(cache.get(&envelopes[0].cid).is_some());

    cache.insert(envelopes[3].clone());
    assert_eq!(cache.len(), 3);
    assert!(cache.contains(&envelopes[0].cid), "recently used survived");
    assert!(!cache.contains(&envelopes[1].cid), "LRU entry evicted");
    assert!(cache.contains(&envelopes[2].cid));
    assert!(cache.contains(&envelopes[3].cid));
}

#[test]
fn cache_reinsert_does_not_grow() {
    let identity = Identity::generate().expect("identity");
    let cache = ContentCache::new(2);
    let env = ContentEnvelope::create(&identity, b"same".to_vec(), BTreeMap::new());

    cache.insert(env.clone());
    cache.insert(env.clone());
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn missing_content_resolves_to_none() {
    let network = Network::new(2, 0).await.expect("network");
    network.connect_pair(0, 1).await.expect("connect");

    let node = network.node(0).unwrap().clone();
    let cid = Cid::compute(b"never published");
    let got = node.get_content(&cid).await.expect("want");
    assert!(got.is_none());

    network.shutdown().await;
}
