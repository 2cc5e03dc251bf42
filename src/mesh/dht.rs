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
#![warn(missing_docs)]

//! In-memory DHT store with signed, sequence-protected records.
//!
//! A record is accepted only when its signature verifies under the stored
//! public key and the publisher id equals SHA-256 of that key. A record
//! whose sequence is not greater than the stored one is acknowledged but
//! never overwrites, which blocks replay and roll-back.
//!
//! Location records bind a node id to its address list. Their signature
//! domain is the canonical string
//! `hex(nodeid) ":" seq ":" timestamp (":" path)*`, so only the key holder
//! can move a node.

use crate::mesh::identity::{self, Identity};
use crate::types::{
    decode_canonical_limited, encode_canonical, now_ms, NodeId, PathAddr,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Size cap for decoded record values.
const MAX_VALUE_LEN: usize = 256 * 1024;

/// DHT errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DhtError {
    /// Record signature did not verify over the value.
    #[error("bad signature")]
    BadSignature,
    /// Publisher id does not match the public key.
    #[error("publisher does not match public key")]
    BadPublisher,
    /// Value failed to decode.
    #[error("bad value")]
    BadValue,
}

/// Signed, versioned record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DhtRecord {
    /// 32-byte key.
    pub key: [u8; 32],
    /// Opaque value bytes.
    pub value: Vec<u8>,
    /// Publishing node (SHA-256 of `public_key`).
    pub publisher: NodeId,
    /// Publisher's Ed25519 public key.
    pub public_key: [u8; 32],
    /// Ed25519 signature over `value`.
    pub signature: Vec<u8>,
    /// Monotonic sequence; stale sequences never overwrite.
    pub seq: u64,
    /// Publication time, ms since UNIX epoch.
    pub timestamp_ms: u64,
}

impl DhtRecord {
    /// Build and sign a record.
    pub fn signed(identity: &Identity, key: [u8; 32], value: Vec<u8>, seq: u64) -> Self {
        let signature = identity.sign(&value).to_vec();
        Self {
            key,
            value,
            publisher: identity.node_id(),
            public_key: identity.public_key(),
            signature,
            seq,
            timestamp_ms: now_ms(),
        }
    }

    /// Verify the publisher binding and value signature.
    pub fn verify(&self) -> Result<(), DhtError> {
        if NodeId::from_public_key(&self.public_key) != self.publisher {
            return Err(DhtError::BadPublisher);
        }
        if !identity::verify(&self.public_key, &self.value, &self.signature) {
            return Err(DhtError::BadSignature);
        }
        Ok(())
    }
}

/// Outcome of a put.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// Record stored (new key or greater sequence).
    Stored,
    /// Sequence not greater than the stored record; kept the old one.
    Ignored,
}

/// Thread-safe record store.
pub struct DhtStore {
    records: RwLock<HashMap<[u8; 32], DhtRecord>>,
}

impl Default for DhtStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DhtStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a record after verification. Stale sequences are accepted
    /// silently without overwriting.
    pub fn put(&self, record: DhtRecord) -> Result<PutOutcome, DhtError> {
        record.verify()?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = records.get(&record.key) {
            if record.seq <= existing.seq {
                return Ok(PutOutcome::Ignored);
            }
        }
        records.insert(record.key, record);
        Ok(PutOutcome::Stored)
    }

    /// Fetch the current record for a key.
    pub fn get(&self, key: &[u8; 32]) -> Option<DhtRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(key).cloned()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// DHT_GET payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DhtGetRequest {
    /// Correlation id.
    pub req_id: u64,
    /// Requested key.
    pub key: [u8; 32],
}

/// DHT_GET_RESP payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DhtGetResponse {
    /// Correlation id.
    pub req_id: u64,
    /// The record, when the responder holds one.
    pub record: Option<DhtRecord>,
}

/// Address binding carried in a location record's value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationValue {
    /// Bound addresses.
    pub addrs: Vec<PathAddr>,
    /// Location sequence (mirrors the outer record sequence).
    pub seq: u64,
    /// Binding time, ms since UNIX epoch.
    pub timestamp_ms: u64,
    /// Signature over the location signing domain.
    pub location_sig: Vec<u8>,
}

/// Canonical signing bytes for a location binding.
pub fn location_signing_bytes(
    node_id: &NodeId,
    seq: u64,
    timestamp_ms: u64,
    addrs: &[PathAddr],
) -> Vec<u8> {
    let mut s = format!("{}:{}:{}", hex::encode(node_id.as_bytes()), seq, timestamp_ms);
    for addr in addrs {
        s.push(':');
        s.push_str(&addr.0);
    }
    s.into_bytes()
}

/// Build a signed location record for this identity. The record key is the
/// node id bytes.
pub fn make_location_record(
    identity: &Identity,
    addrs: Vec<PathAddr>,
    seq: u64,
) -> Result<DhtRecord, DhtError> {
    let timestamp_ms = now_ms();
    let domain = location_signing_bytes(&identity.node_id(), seq, timestamp_ms, &addrs);
    let location_sig = identity.sign(&domain).to_vec();
    let value = encode_canonical(&LocationValue {
        addrs,
        seq,
        timestamp_ms,
        location_sig,
    })
    .map_err(|_| DhtError::BadValue)?;
    Ok(DhtRecord::signed(
        identity,
        *identity.node_id().as_bytes(),
        value,
        seq,
    ))
}

/// Decode and verify a location record, returning the bound addresses.
pub fn resolve_location(record: &DhtRecord) -> Result<Vec<PathAddr>, DhtError> {
    record.verify()?;
    let value: LocationValue =
        decode_canonical_limited(&record.value, MAX_VALUE_LEN).map_err(|_| DhtError::BadValue)?;
    let domain = location_signing_bytes(
        &record.publisher,
        value.seq,
        value.timestamp_ms,
        &value.addrs,
    );
    if !identity::verify(&record.public_key, &domain, &value.location_sig) {
        return Err(DhtError::BadSignature);
    }
    Ok(value.addrs)
}
