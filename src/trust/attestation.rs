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

//! Signed claims one node makes about another.
//!
//! Signing bytes are the canonical concatenation
//! `subject || attester || claim || confidence (micro-units, u64 BE) ||
//! expiry ms (u64 BE)`. Confidence is fixed-point so the byte form never
//! depends on float formatting.

use crate::mesh::identity::{self, Identity};
use crate::types::{now_ms, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Attestation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttestationError {
    /// Signature did not verify.
    #[error("bad signature")]
    BadSignature,
    /// Attester id does not match the public key.
    #[error("attester does not match public key")]
    BadAttester,
    /// Already expired at add time.
    #[error("expired")]
    Expired,
    /// Confidence outside [0, 1].
    #[error("confidence out of range")]
    BadConfidence,
}

/// A signed claim with confidence and expiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    /// Node the claim is about.
    pub subject: NodeId,
    /// Node making the claim.
    pub attester: NodeId,
    /// Attester's Ed25519 public key.
    pub public_key: [u8; 32],
    /// Claim text.
    pub claim: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Expiry, ms since UNIX epoch.
    pub expires_at_ms: u64,
    /// Signature over the canonical signing bytes.
    pub signature: Vec<u8>,
}

/// Fixed-point confidence used inside the signing bytes.
pub fn confidence_micros(confidence: f64) -> u64 {
    (confidence.clamp(0.0, 1.0) * 1_000_000.0).round() as u64
}

/// Canonical signing bytes.
pub fn signing_bytes(
    subject: &NodeId,
    attester: &NodeId,
    claim: &str,
    confidence: f64,
    expires_at_ms: u64,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + 32 + claim.len() + 8 + 8);
    out.extend_from_slice(subject.as_bytes());
    out.extend_from_slice(attester.as_bytes());
    out.extend_from_slice(claim.as_bytes());
    out.extend_from_slice(&confidence_micros(confidence).to_be_bytes());
    out.extend_from_slice(&expires_at_ms.to_be_bytes());
    out
}

impl Attestation {
    /// Create a signed attestation valid for `ttl_ms` from now.
    pub fn create(
        identity: &Identity,
        subject: NodeId,
        claim: &str,
        confidence: f64,
        ttl_ms: u64,
    ) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        let expires_at_ms = now_ms().saturating_add(ttl_ms);
        let signature = identity
            .sign(&signing_bytes(
                &subject,
                &identity.node_id(),
                claim,
                confidence,
                expires_at_ms,
            ))
            .to_vec();
        Self {
            subject,
            attester: identity.node_id(),
            public_key: identity.public_key(),
            claim: claim.to_string(),
            confidence,
            expires_at_ms,
            signature,
        }
    }

    /// Verify the attester binding and signature.
    pub fn verify(&self) -> Result<(), AttestationError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(AttestationError::BadConfidence);
        }
        if NodeId::from_public_key(&self.public_key) != self.attester {
            return Err(AttestationError::BadAttester);
        }
        let bytes = signing_bytes(
            &self.subject,
            &self.attester,
            &self.claim,
            self.confidence,
            self.expires_at_ms,
        );
        if !identity::verify(&self.public_key, &bytes, &self.signature) {
            return Err(AttestationError::BadSignature);
        }
        Ok(())
    }

    /// Whether the attestation has expired at `now_ms`.
    pub fn expired_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

/// Attestations indexed by subject and attester.
pub struct AttestationStore {
    by_subject: RwLock<HashMap<NodeId, Vec<Attestation>>>,
    by_attester: RwLock<HashMap<NodeId, Vec<Attestation>>>,
}

impl Default for AttestationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AttestationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            by_subject: RwLock::new(HashMap::new()),
            by_attester: RwLock::new(HashMap::new()),
        }
    }

    /// Add an attestation after verifying signature and expiry.
    pub fn add(&self, attestation: Attestation) -> Result<(), AttestationError> {
        attestation.verify()?;
        if attestation.expired_at(now_ms()) {
            return Err(AttestationError::Expired);
        }

        let mut by_subject = self.by_subject.write().unwrap_or_else(|e| e.into_inner());
        let mut by_attester = self.by_attester.write().unwrap_or_else(|e| e.into_inner());
        let subject_entry = by_subject.entry(attestation.subject).or_default();
        // Replace a prior claim from the same attester with the same text.
        subject_entry.retain(|a| {
            !(a.attester == attestation.attester && a.claim == attestation.claim)
        });
        subject_entry.push(attestation.clone());

        let attester_entry = by_attester.entry(attestation.attester).or_default();
        attester_entry.retain(|a| {
            !(a.subject == attestation.subject && a.claim == attestation.claim)
        });
        attester_entry.push(attestation);
        Ok(())
    }

    /// Remove every attestation about `subject` by `attester`.
    pub fn remove(&self, subject: &NodeId, attester: &NodeId) -> usize {
        let mut removed = 0;
        {
            let mut by_subject = self.by_subject.write().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = by_subject.get_mut(subject) {
                let before = entry.len();
                entry.retain(|a| a.attester != *attester);
                removed = before - entry.len();
            }
        }
        let mut by_attester = self.by_attester.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = by_attester.get_mut(attester) {
            entry.retain(|a| a.subject != *subject);
        }
        removed
    }

    /// Attestations naming `subject`, excluding expired ones by default.
    pub fn by_subject(&self, subject: &NodeId, include_expired: bool) -> Vec<Attestation> {
        let now = now_ms();
        let by_subject = self.by_subject.read().unwrap_or_else(|e| e.into_inner());
        by_subject
            .get(subject)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|a| include_expired || !a.expired_at(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Attestations made by `attester`, excluding expired ones by default.
    pub fn by_attester(&self, attester: &NodeId, include_expired: bool) -> Vec<Attestation> {
        let now = now_ms();
        let by_attester = self.by_attester.read().unwrap_or_else(|e| e.into_inner());
        by_attester
            .get(attester)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|a| include_expired || !a.expired_at(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every non-expired attestation.
    pub fn all(&self) -> Vec<Attestation> {
        let now = now_ms();
        let by_subject = self.by_subject.read().unwrap_or_else(|e| e.into_inner());
        by_subject
            .values()
            .flatten()
            .filter(|a| !a.expired_at(now))
            .cloned()
            .collect()
    }
}
