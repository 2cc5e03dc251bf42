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

//! Content ids and signed content envelopes.
//!
//! A CID is a 34-byte multihash: algorithm byte `0x12` (SHA-256), digest
//! length byte `0x20`, then the digest. Equal CIDs imply byte-equal data.
//! Envelope signatures cover `CID || data`; envelopes are immutable.

use crate::mesh::identity::{self, Identity};
use crate::types::{now_ms, sha256, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Multihash algorithm byte for SHA-256.
pub const CID_ALGO_SHA256: u8 = 0x12;
/// Multihash digest length byte for SHA-256.
pub const CID_DIGEST_LEN: u8 = 0x20;
/// Total CID length.
pub const CID_LEN: usize = 34;

/// 34-byte content id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cid([u8; CID_LEN]);

impl Cid {
    /// Compute the CID of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let digest = sha256(data);
        let mut out = [0u8; CID_LEN];
        out[0] = CID_ALGO_SHA256;
        out[1] = CID_DIGEST_LEN;
        out[2..].copy_from_slice(&digest);
        Self(out)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; CID_LEN] {
        &self.0
    }

    /// Parse from raw bytes, checking the multihash prefix.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CID_LEN || bytes[0] != CID_ALGO_SHA256 || bytes[1] != CID_DIGEST_LEN {
            return None;
        }
        let mut out = [0u8; CID_LEN];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }

    /// The digest portion.
    pub fn digest(&self) -> &[u8] {
        &self.0[2..]
    }

    /// Hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex.
    pub fn from_hex(s: &str) -> Option<Self> {
        Self::from_bytes(&hex::decode(s).ok()?)
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self.to_hex())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Cid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Cid::from_hex(&s).ok_or_else(|| D::Error::custom("bad cid"))
        } else {
            struct V;
            impl<'de> serde::de::Visitor<'de> for V {
                type Value = Vec<u8>;
                fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str("cid bytes")
                }
                fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                    Ok(v.to_vec())
                }
                fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                    Ok(v)
                }
            }
            let bytes = deserializer.deserialize_byte_buf(V)?;
            Cid::from_bytes(&bytes).ok_or_else(|| D::Error::custom("bad cid"))
        }
    }
}

/// Envelope verification failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// CID does not match the data.
    #[error("cid mismatch")]
    CidMismatch,
    /// Signature did not verify under the publisher key.
    #[error("bad signature")]
    BadSignature,
    /// Publisher id does not match the claimed public key.
    #[error("publisher does not match public key")]
    BadPublisher,
}

/// Immutable, signed content unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentEnvelope {
    /// Content id (multihash of `data`).
    pub cid: Cid,
    /// Content bytes.
    pub data: Vec<u8>,
    /// Publishing node.
    pub publisher: NodeId,
    /// Publisher's Ed25519 public key.
    pub public_key: [u8; 32],
    /// Ed25519 signature over `CID || data`.
    pub signature: Vec<u8>,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
    /// Creation time, ms since UNIX epoch.
    pub created_at_ms: u64,
}

/// Signature domain: CID bytes concatenated with the data.
pub fn envelope_signing_bytes(cid: &Cid, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CID_LEN + data.len());
    out.extend_from_slice(cid.as_bytes());
    out.extend_from_slice(data);
    out
}

impl ContentEnvelope {
    /// Build and sign an envelope for `data`.
    pub fn create(
        identity: &Identity,
        data: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let cid = Cid::compute(&data);
        let signature = identity.sign(&envelope_signing_bytes(&cid, &data)).to_vec();
        Self {
            cid,
            data,
            publisher: identity.node_id(),
            public_key: identity.public_key(),
            signature,
            metadata,
            created_at_ms: now_ms(),
        }
    }

    /// Verify the CID binding and the publisher signature.
    pub fn verify(&self) -> Result<(), EnvelopeError> {
        if Cid::compute(&self.data) != self.cid {
            return Err(EnvelopeError::CidMismatch);
        }
        if NodeId::from_public_key(&self.public_key) != self.publisher {
            return Err(EnvelopeError::BadPublisher);
        }
        if !identity::verify(
            &self.public_key,
            &envelope_signing_bytes(&self.cid, &self.data),
            &self.signature,
        ) {
            return Err(EnvelopeError::BadSignature);
        }
        Ok(())
    }
}
