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

//! Attestations, transitive trust, and capability tokens.

use std::collections::BTreeMap;
use valhalla::mesh::identity::Identity;
use valhalla::trust::{
    compute_trust, verify_chain, Attestation, AttestationError, AttestationStore, Capability,
    CapabilityError, Holder,
};

const HOUR_MS: u64 = 60 * 60 * 1000;

#[test]
fn transitive_trust_decays_per_hop() {
    let alice = Identity::generate().expect("alice");
    let bob = Identity::generate().expect("bob");
    let carol = Identity::generate().expect("carol");

    let store = AttestationStore::new();
    store
        .add(Attestation::create(
            &alice,
            bob.node_id(),
            "is-trusted",
            0.9,
            HOUR_MS,
        ))
        .expect("alice->bob");
    store
        .add(Attestation::create(
            &bob,
            carol.node_id(),
            "is-trusted",
            0.85,
            HOUR_MS,
        ))
        .expect("bob->carol");

    let direct = compute_trust(&store, &alice.node_id(), &bob.node_id());
    assert!((direct - 0.9).abs() < 1e-9, "direct trust {direct}");

    let transitive = compute_trust(&store, &alice.node_id(), &carol.node_id());
    assert!(transitive > 0.0);
    assert!(transitive < 0.9);
    assert!(
        transitive < 0.9 * 0.85,
        "decay must apply: {transitive} >= {}",
        0.9 * 0.85
    );

    // No path in the reverse direction.
    let reverse = compute_trust(&store, &carol.node_id(), &alice.node_id());
    assert_eq!(reverse, 0.0);
}

#[test]
fn trust_ignores_cycles() {
    let a = Identity::generate().expect("a");
    let b = Identity::generate().expect("b");
    let c = Identity::generate().expect("c");

    let store = AttestationStore::new();
    store
        .add(Attestation::create(&a, b.node_id(), "t", 0.8, HOUR_MS))
        .expect("a->b");
    store
        .add(Attestation::create(&b, a.node_id(), "t", 0.8, HOUR_MS))
        .expect("b->a cycle");
    store
        .add(Attestation::create(&b, c.node_id(), "t", 0.5, HOUR_MS))
        .expect("b->c");

    let score = compute_trust(&store, &a.node_id(), &c.node_id());
    // One valid path a->b->c; the a<->b cycle must not inflate or hang it.
    assert!((score - 0.8 * 0.5 * 0.9).abs() < 1e-9, "score {score}");
}

#[test]
fn expired_attestations_are_absent_from_queries() {
    let attester = Identity::generate().expect("attester");
    let subject = Identity::generate().expect("subject");

    let store = AttestationStore::new();
    store
        .add(Attestation::create(
            &attester,
            subject.node_id(),
            "short-lived",
            0.7,
            50,
        ))
        .expect("valid at add time");

    std::thread::sleep(std::time::Duration::from_millis(120));

    assert!(store.by_subject(&subject.node_id(), false).is_empty());
    assert_eq!(store.by_subject(&subject.node_id(), true).len(), 1);
}

#[test]
fn attestation_signature_and_binding_checks() {
    let attester = Identity::generate().expect("attester");
    let subject = Identity::generate().expect("subject");
    let stranger = Identity::generate().expect("stranger");

    let good = Attestation::create(&attester, subject.node_id(), "claim", 0.5, HOUR_MS);
    good.verify().expect("valid");

    let mut tampered = good.clone();
    tampered.confidence = 0.99;
    assert_eq!(tampered.verify(), Err(AttestationError::BadSignature));

    let mut forged = good.clone();
    forged.attester = stranger.node_id();
    assert_eq!(forged.verify(), Err(AttestationError::BadAttester));

    let store = AttestationStore::new();
    assert!(store.add(tampered).is_err());
    assert!(store.by_subject(&subject.node_id(), true).is_empty());
}

#[test]
fn capability_verification() {
    let issuer = Identity::generate().expect("issuer");
    let holder = Identity::generate().expect("holder");
    let stranger = Identity::generate().expect("stranger");

    let cap = Capability::issue(
        &issuer,
        Holder::Node(holder.node_id()),
        "files/*",
        vec!["read".to_string(), "list".to_string()],
        BTreeMap::new(),
        false,
        HOUR_MS,
    );

    cap.verify("read", Some("files/readme.md"), &holder.node_id())
        .expect("granted");
    cap.verify("list", None, &holder.node_id()).expect("granted");

    assert_eq!(
        cap.verify("write", Some("files/readme.md"), &holder.node_id()),
        Err(CapabilityError::ActionNotAllowed)
    );
    assert_eq!(
        cap.verify("read", Some("secrets/key"), &holder.node_id()),
        Err(CapabilityError::ResourceMismatch)
    );
    assert_eq!(
        cap.verify("read", Some("files/readme.md"), &stranger.node_id()),
        Err(CapabilityError::HolderMismatch)
    );

    // Bearer tokens work for anyone.
    let bearer = Capability::issue(
        &issuer,
        Holder::Bearer,
        "*",
        vec!["read".to_string()],
        BTreeMap::new(),
        false,
        HOUR_MS,
    );
    bearer
        .verify("read", Some("anything"), &stranger.node_id())
        .expect("bearer");

    // Tampering breaks the signature.
    let mut tampered = cap.clone();
    tampered.actions.push("write".to_string());
    assert_eq!(
        tampered.verify("write", None, &holder.node_id()),
        Err(CapabilityError::BadSignature)
    );
}

#[test]
fn delegation_chain_verification() {
    let root = Identity::generate().expect("root");
    let middle = Identity::generate().expect("middle");
    let leaf_holder = Identity::generate().expect("leaf");

    let grant = Capability::issue(
        &root,
        Holder::Node(middle.node_id()),
        "files/*",
        vec!["read".to_string()],
        BTreeMap::new(),
        true,
        HOUR_MS,
    );
    let delegated = Capability::issue(
        &middle,
        Holder::Node(leaf_holder.node_id()),
        "files/docs/*",
        vec!["read".to_string()],
        BTreeMap::new(),
        false,
        HOUR_MS,
    );

    verify_chain(
        &[grant.clone(), delegated.clone()],
        "read",
        Some("files/docs/a.txt"),
        &leaf_holder.node_id(),
    )
    .expect("valid chain");

    // A non-delegatable root breaks the chain.
    let rigid = Capability::issue(
        &root,
        Holder::Node(middle.node_id()),
        "files/*",
        vec!["read".to_string()],
        BTreeMap::new(),
        false,
        HOUR_MS,
    );
    assert_eq!(
        verify_chain(
            &[rigid, delegated.clone()],
            "read",
            Some("files/docs/a.txt"),
            &leaf_holder.node_id(),
        ),
        Err(CapabilityError::BadChain)
    );

    // A link issued by the wrong party breaks the chain.
    let stranger = Identity::generate().expect("stranger");
    let hijacked = Capability::issue(
        &stranger,
        Holder::Node(leaf_holder.node_id()),
        "files/docs/*",
        vec!["read".to_string()],
        BTreeMap::new(),
        false,
        HOUR_MS,
    );
    assert_eq!(
        verify_chain(
            &[grant, hijacked],
            "read",
            Some("files/docs/a.txt"),
            &leaf_holder.node_id(),
        ),
        Err(CapabilityError::BadChain)
    );
}
