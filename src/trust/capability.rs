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

//! Capability tokens: signed, optionally delegatable permissions.
//!
//! Verification checks the issuer signature, expiry, action membership,
//! resource pattern match, and the holder binding (`*` marks a bearer
//! token). A delegation chain is valid when every link is delegatable up
//! to the leaf, each link's holder issues the next link, and the granted
//! actions only narrow.

use crate::mesh::identity::{self, Identity};
use crate::types::{now_ms, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

const CAPABILITY_DOMAIN: &str = "valhalla-capability-v1";

/// Bearer holder marker.
pub const BEARER: &str = "*";

/// Capability verification failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// Signature did not verify.
    #[error("bad signature")]
    BadSignature,
    /// Issuer id does not match the public key.
    #[error("issuer does not match public key")]
    BadIssuer,
    /// Token past its expiry.
    #[error("expired")]
    Expired,
    /// Requested action not granted.
    #[error("action not allowed")]
    ActionNotAllowed,
    /// Resource does not match the pattern.
    #[error("resource mismatch")]
    ResourceMismatch,
    /// Caller is not the holder.
    #[error("holder mismatch")]
    HolderMismatch,
    /// Delegation chain broken.
    #[error("bad delegation chain")]
    BadChain,
}

/// Holder designator: a specific node or any bearer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Holder {
    /// Bound to one node.
    Node(NodeId),
    /// Bearer token.
    Bearer,
}

impl Holder {
    fn canonical(&self) -> Vec<u8> {
        match self {
            Holder::Node(id) => id.as_bytes().to_vec(),
            Holder::Bearer => BEARER.as_bytes().to_vec(),
        }
    }
}

/// A signed permission grant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Granting node.
    pub issuer: NodeId,
    /// Issuer's Ed25519 public key.
    pub public_key: [u8; 32],
    /// Grantee (or bearer).
    pub holder: Holder,
    /// Resource pattern (`*` suffix matches a prefix).
    pub resource: String,
    /// Granted actions.
    pub actions: Vec<String>,
    /// Free-form constraints.
    pub constraints: BTreeMap<String, String>,
    /// Whether the holder may delegate.
    pub delegatable: bool,
    /// Expiry, ms since UNIX epoch.
    pub expires_at_ms: u64,
    /// Signature over the canonical signing bytes.
    pub signature: Vec<u8>,
}

fn signing_bytes(cap: &Capability) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(CAPABILITY_DOMAIN.as_bytes());
    out.extend_from_slice(cap.issuer.as_bytes());
    out.extend_from_slice(&cap.holder.canonical());
    out.extend_from_slice(cap.resource.as_bytes());
    out.push(0);
    for action in &cap.actions {
        out.extend_from_slice(action.as_bytes());
        out.push(0);
    }
    for (k, v) in &cap.constraints {
        out.extend_from_slice(k.as_bytes());
        out.push(b'=');
        out.extend_from_slice(v.as_bytes());
        out.push(0);
    }
    out.push(cap.delegatable as u8);
    out.extend_from_slice(&cap.expires_at_ms.to_be_bytes());
    out
}

/// Whether `resource` matches `pattern` (`*` alone matches everything, a
/// `*` suffix matches the prefix).
pub fn resource_matches(pattern: &str, resource: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return resource.starts_with(prefix);
    }
    pattern == resource
}

impl Capability {
    /// Issue a signed capability valid for `ttl_ms` from now.
    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        identity: &Identity,
        holder: Holder,
        resource: &str,
        actions: Vec<String>,
        constraints: BTreeMap<String, String>,
        delegatable: bool,
        ttl_ms: u64,
    ) -> Self {
        let mut cap = Self {
            issuer: identity.node_id(),
            public_key: identity.public_key(),
            holder,
            resource: resource.to_string(),
            actions,
            constraints,
            delegatable,
            expires_at_ms: now_ms().saturating_add(ttl_ms),
            signature: Vec::new(),
        };
        cap.signature = identity.sign(&signing_bytes(&cap)).to_vec();
        cap
    }

    /// Verify the issuer binding and signature.
    pub fn verify_signature(&self) -> Result<(), CapabilityError> {
        if NodeId::from_public_key(&self.public_key) != self.issuer {
            return Err(CapabilityError::BadIssuer);
        }
        if !identity::verify(&self.public_key, &signing_bytes(self), &self.signature) {
            return Err(CapabilityError::BadSignature);
        }
        Ok(())
    }

    /// Full check: signature, expiry, action, resource, holder.
    pub fn verify(
        &self,
        action: &str,
        resource: Option<&str>,
        caller: &NodeId,
    ) -> Result<(), CapabilityError> {
        self.verify_signature()?;
        if self.expires_at_ms <= now_ms() {
            return Err(CapabilityError::Expired);
        }
        if !self.actions.iter().any(|a| a == action) {
            return Err(CapabilityError::ActionNotAllowed);
        }
        if let Some(resource) = resource {
            if !resource_matches(&self.resource, resource) {
                return Err(CapabilityError::ResourceMismatch);
            }
        }
        match &self.holder {
            Holder::Bearer => Ok(()),
            Holder::Node(id) if id == caller => Ok(()),
            Holder::Node(_) => Err(CapabilityError::HolderMismatch),
        }
    }
}

/// Verify a delegation chain rooted at `chain[0]`, authorizing `caller` to
/// perform `action` on `resource`.
///
/// Every link except the last must be delegatable; each link's holder must
/// issue the next link; actions and resources may only narrow.
pub fn verify_chain(
    chain: &[Capability],
    action: &str,
    resource: Option<&str>,
    caller: &NodeId,
) -> Result<(), CapabilityError> {
    let Some(leaf) = chain.last() else {
        return Err(CapabilityError::BadChain);
    };

    for (i, cap) in chain.iter().enumerate() {
        cap.verify_signature()?;
        if cap.expires_at_ms <= now_ms() {
            return Err(CapabilityError::Expired);
        }
        if !cap.actions.iter().any(|a| a == action) {
            return Err(CapabilityError::ActionNotAllowed);
        }
        if let Some(resource) = resource {
            if !resource_matches(&cap.resource, resource) {
                return Err(CapabilityError::ResourceMismatch);
            }
        }
        let is_leaf = i == chain.len() - 1;
        if !is_leaf {
            if !cap.delegatable {
                return Err(CapabilityError::BadChain);
            }
            // The holder of this link must issue the next one.
            let next = &chain[i + 1];
            match &cap.holder {
                Holder::Node(id) if *id == next.issuer => {}
                Holder::Bearer => {}
                Holder::Node(_) => return Err(CapabilityError::BadChain),
            }
        }
    }

    match &leaf.holder {
        Holder::Bearer => Ok(()),
        Holder::Node(id) if id == caller => Ok(()),
        Holder::Node(_) => Err(CapabilityError::HolderMismatch),
    }
}
