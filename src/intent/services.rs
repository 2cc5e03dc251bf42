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

//! Service records and the local provider registry.
//!
//! Records are signed by their provider; the registry drops anything that
//! fails verification. Provider selection is uniform random, the load
//! field is advisory only.

use crate::mesh::identity::{self, Identity};
use crate::types::{encode_canonical, sha256, NodeId};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use thiserror::Error;

const SERVICE_DOMAIN: &str = "valhalla-service-v1";

/// Service record errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Signature did not verify.
    #[error("bad signature")]
    BadSignature,
    /// Provider id does not match the public key.
    #[error("provider does not match public key")]
    BadProvider,
    /// Load outside [0, 1].
    #[error("load out of range")]
    BadLoad,
}

/// Signed advertisement of a service provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Service name.
    pub service: String,
    /// Providing node.
    pub provider: NodeId,
    /// Provider's Ed25519 public key.
    pub public_key: [u8; 32],
    /// Advertised capabilities.
    pub capabilities: BTreeMap<String, String>,
    /// Advisory load in [0, 1].
    pub load: f64,
    /// Record version.
    pub version: u32,
    /// Signature over the canonical signing bytes.
    pub signature: Vec<u8>,
}

/// Fixed-point encoding of the load field (micro-units).
fn load_micros(load: f64) -> u64 {
    (load.clamp(0.0, 1.0) * 1_000_000.0).round() as u64
}

fn signing_bytes(
    service: &str,
    provider: &NodeId,
    capabilities: &BTreeMap<String, String>,
    load: f64,
    version: u32,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(SERVICE_DOMAIN.as_bytes());
    out.extend_from_slice(service.as_bytes());
    out.push(0);
    out.extend_from_slice(provider.as_bytes());
    if let Ok(caps) = encode_canonical(capabilities) {
        out.extend_from_slice(&caps);
    }
    out.extend_from_slice(&load_micros(load).to_be_bytes());
    out.extend_from_slice(&version.to_be_bytes());
    out
}

impl ServiceRecord {
    /// Build and sign a record for a local service.
    pub fn signed(
        identity: &Identity,
        service: &str,
        capabilities: BTreeMap<String, String>,
        load: f64,
        version: u32,
    ) -> Self {
        let load = load.clamp(0.0, 1.0);
        let signature = identity
            .sign(&signing_bytes(
                service,
                &identity.node_id(),
                &capabilities,
                load,
                version,
            ))
            .to_vec();
        Self {
            service: service.to_string(),
            provider: identity.node_id(),
            public_key: identity.public_key(),
            capabilities,
            load,
            version,
            signature,
        }
    }

    /// Verify the provider binding and signature.
    pub fn verify(&self) -> Result<(), ServiceError> {
        if !(0.0..=1.0).contains(&self.load) {
            return Err(ServiceError::BadLoad);
        }
        if NodeId::from_public_key(&self.public_key) != self.provider {
            return Err(ServiceError::BadProvider);
        }
        let bytes = signing_bytes(
            &self.service,
            &self.provider,
            &self.capabilities,
            self.load,
            self.version,
        );
        if !identity::verify(&self.public_key, &bytes, &self.signature) {
            return Err(ServiceError::BadSignature);
        }
        Ok(())
    }
}

/// DHT key for a provider's advertisement of a service.
pub fn service_key(service: &str, provider: &NodeId) -> [u8; 32] {
    let mut input = Vec::with_capacity(4 + service.len() + 1 + 32);
    input.extend_from_slice(b"svc:");
    input.extend_from_slice(service.as_bytes());
    input.push(0);
    input.extend_from_slice(provider.as_bytes());
    sha256(&input)
}

/// Local view of known service providers.
pub struct ServiceRegistry {
    local: RwLock<HashMap<String, ServiceRecord>>,
    remote: RwLock<HashMap<String, HashMap<NodeId, ServiceRecord>>>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            local: RwLock::new(HashMap::new()),
            remote: RwLock::new(HashMap::new()),
        }
    }

    /// Register a locally provided service.
    pub fn register_local(&self, record: ServiceRecord) -> Result<(), ServiceError> {
        record.verify()?;
        self.local
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.service.clone(), record);
        Ok(())
    }

    /// Drop a locally provided service.
    pub fn unregister_local(&self, service: &str) -> bool {
        self.local
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(service)
            .is_some()
    }

    /// Records for locally provided services.
    pub fn local_records(&self) -> Vec<ServiceRecord> {
        self.local
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Local record for one service.
    pub fn local_record(&self, service: &str) -> Option<ServiceRecord> {
        self.local
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(service)
            .cloned()
    }

    /// Record a remotely observed provider. Unverifiable records are dropped.
    pub fn observe_remote(&self, record: ServiceRecord) -> Result<(), ServiceError> {
        record.verify()?;
        self.remote
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(record.service.clone())
            .or_default()
            .insert(record.provider, record);
        Ok(())
    }

    /// All verified providers of a service (local first).
    pub fn providers(&self, service: &str) -> Vec<ServiceRecord> {
        let mut out = Vec::new();
        if let Some(local) = self.local_record(service) {
            out.push(local);
        }
        let remote = self.remote.read().unwrap_or_else(|e| e.into_inner());
        if let Some(entries) = remote.get(service) {
            for record in entries.values() {
                if out.iter().all(|r| r.provider != record.provider) {
                    out.push(record.clone());
                }
            }
        }
        out
    }

    /// Pick one provider uniformly at random.
    pub fn select_provider(&self, service: &str) -> Option<ServiceRecord> {
        let providers = self.providers(service);
        providers.choose(&mut rand::thread_rng()).cloned()
    }
}
