// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! DHT record verification and replay protection.

use valhalla::mesh::dht::{
    make_location_record, resolve_location, DhtError, DhtRecord, DhtStore, PutOutcome,
};
use valhalla::mesh::identity::Identity;
use valhalla::types::PathAddr;

#[test]
fn stale_sequences_never_overwrite() {
    let identity = Identity::generate().expect("identity");
    let store = DhtStore::new();
    let key = [7u8; 32];

    let first = DhtRecord::signed(&identity, key, b"v2".to_vec(), 2);
    assert_eq!(store.put(first).expect("put"), PutOutcome::Stored);

    // Equal sequence: accepted silently, not stored.
    let replay = DhtRecord::signed(&identity, key, b"replayed".to_vec(), 2);
    assert_eq!(store.put(replay).expect("put"), PutOutcome::Ignored);
    assert_eq!(store.get(&key).unwrap().value, b"v2".to_vec());

    // Lower sequence: same.
    let rollback = DhtRecord::signed(&identity, key, b"v1".to_vec(), 1);
    assert_eq!(store.put(rollback).expect("put"), PutOutcome::Ignored);
    assert_eq!(store.get(&key).unwrap().value, b"v2".to_vec());

    // Greater sequence overwrites.
    let newer = DhtRecord::signed(&identity, key, b"v3".to_vec(), 3);
    assert_eq!(store.put(newer).expect("put"), PutOutcome::Stored);
    assert_eq!(store.get(&key).unwrap().value, b"v3".to_vec());
}

#[test]
fn tampered_records_are_rejected() {
    let identity = Identity::generate().expect("identity");
    let other = Identity::generate().expect("other");
    let store = DhtStore::new();

    let mut tampered = DhtRecord::signed(&identity, [1u8; 32], b"value".to_vec(), 1);
    tampered.value = b"evil".to_vec();
    assert_eq!(store.put(tampered), Err(DhtError::BadSignature));

    let mut forged = DhtRecord::signed(&identity, [2u8; 32], b"value".to_vec(), 1);
    forged.publisher = other.node_id();
    assert_eq!(store.put(forged), Err(DhtError::BadPublisher));

    assert!(store.is_empty());
}

#[test]
fn location_records_round_trip() {
    let identity = Identity::generate().expect("identity");
    let addrs = vec![PathAddr::tcp("127.0.0.1:4100"), PathAddr::ws("127.0.0.1:4101")];

    let record = make_location_record(&identity, addrs.clone(), 5).expect("record");
    assert_eq!(record.key, *identity.node_id().as_bytes());
    assert_eq!(record.seq, 5);

    let resolved = resolve_location(&record).expect("resolve");
    assert_eq!(resolved, addrs);
}

#[test]
fn location_records_reject_address_tampering() {
    let identity = Identity::generate().expect("identity");
    let record = make_location_record(&identity, vec![PathAddr::tcp("10.0.0.1:1")], 1)
        .expect("record");

    // Re-signing the outer record over altered inner bytes still fails the
    // inner location signature.
    let mut altered_value = record.value.clone();
    let last = altered_value.len() - 1;
    altered_value[last] ^= 0xff;
    let reissued = DhtRecord::signed(
        &identity,
        record.key,
        altered_value,
        record.seq + 1,
    );
    assert!(resolve_location(&reissued).is_err());
}
