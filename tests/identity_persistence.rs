// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Identity generation, persistence, and integrity checks.

use valhalla::mesh::identity::{self, Identity, IdentityError};
use valhalla::types::{sha256, NodeId};

#[test]
fn node_id_is_sha256_of_public_key() {
    let identity = Identity::generate().expect("identity");
    let expected = NodeId::from_bytes(sha256(&identity.public_key()));
    assert_eq!(identity.node_id(), expected);
}

#[test]
fn sign_and_verify() {
    let identity = Identity::generate().expect("identity");
    let msg = b"ragnarok schedule";
    let sig = identity.sign(msg);
    assert!(identity::verify(&identity.public_key(), msg, &sig));
    assert!(!identity::verify(&identity.public_key(), b"other", &sig));

    let other = Identity::generate().expect("other");
    assert!(!identity::verify(&other.public_key(), msg, &sig));
}

#[test]
fn persists_and_reloads_the_same_identity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("identity.json");

    let created = Identity::load_or_create(&path).expect("create");
    assert!(path.exists());

    let loaded = Identity::load_or_create(&path).expect("load");
    assert_eq!(created.node_id(), loaded.node_id());
    assert_eq!(created.public_key(), loaded.public_key());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600, "identity file must be owner-only");
    }
}

#[test]
fn corrupted_node_id_is_a_fatal_integrity_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("identity.json");
    Identity::load_or_create(&path).expect("create");

    let raw = std::fs::read_to_string(&path).expect("read");
    let mut doc: serde_json::Value = serde_json::from_str(&raw).expect("json");
    doc["node_id"] = serde_json::Value::String(hex::encode([0u8; 32]));
    std::fs::write(&path, serde_json::to_vec_pretty(&doc).expect("encode")).expect("write");

    let err = Identity::load(&path).expect_err("must fail");
    assert!(matches!(err, IdentityError::IntegrityMismatch), "got {err:?}");
}

#[test]
fn short_id_is_a_base58_prefix() {
    let identity = Identity::generate().expect("identity");
    let full = identity.node_id().to_base58();
    let short = identity.short_id();
    assert_eq!(short.len(), 12);
    assert!(full.starts_with(&short));

    let parsed = NodeId::from_base58(&full).expect("parse");
    assert_eq!(parsed, identity.node_id());
}
