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

//! Intent layer: content-addressed storage and service discovery.
//!
//! `publish` verifies, caches, and registers the provider in the DHT
//! (pushing the record to connected peers). `want` answers from the local
//! cache first, then sends a routed CONTENT_WANT to the provider named by
//! the DHT. `find` merges verified provider records gathered from peers.

pub mod cache;
pub mod cid;
pub mod services;

pub use cache::{ContentCache, DEFAULT_CACHE_CAPACITY};
pub use cid::{Cid, ContentEnvelope, EnvelopeError};
pub use services::{ServiceRecord, ServiceRegistry};

use crate::events::{detail, EventBus};
use crate::mesh::dht::{DhtGetRequest, DhtGetResponse, DhtRecord, DhtStore};
use crate::mesh::identity::Identity;
use crate::mesh::router::{msg_type, Message, PendingRequests, Router};
use crate::types::{decode_canonical_limited, encode_canonical, now_ms, sha256, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Size cap for decoded intent payloads.
const MAX_INTENT_PAYLOAD: usize = 8 * 1024 * 1024;

/// Intent-layer errors.
#[derive(Debug, Error)]
pub enum IntentError {
    /// Envelope failed verification.
    #[error("envelope: {0}")]
    Envelope(#[from] EnvelopeError),
    /// Payload encode/decode failure.
    #[error("codec")]
    Codec,
    /// No provider answered in time.
    #[error("not found")]
    NotFound,
    /// Routed request could not be delivered.
    #[error("routing")]
    Routing,
}

/// DHT key registering the provider of a CID.
pub fn provider_key(cid: &Cid) -> [u8; 32] {
    let mut input = Vec::with_capacity(4 + cid.as_bytes().len());
    input.extend_from_slice(b"cid:");
    input.extend_from_slice(cid.as_bytes());
    sha256(&input)
}

/// CONTENT_WANT payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WantRequest {
    /// Correlation id.
    pub req_id: u64,
    /// Requested content.
    pub cid: Cid,
}

/// CONTENT_RESP payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WantResponse {
    /// Correlation id.
    pub req_id: u64,
    /// The envelope, when the responder holds it.
    pub envelope: Option<ContentEnvelope>,
}

/// SERVICE_QUERY payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceQuery {
    /// Correlation id.
    pub req_id: u64,
    /// Service name.
    pub service: String,
}

/// SERVICE_RESP payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceResponse {
    /// Correlation id.
    pub req_id: u64,
    /// The responder's verified records for the service.
    pub records: Vec<ServiceRecord>,
}

/// Content and service operations bound to one node.
pub struct IntentLayer {
    identity: Arc<Identity>,
    cache: Arc<ContentCache>,
    registry: Arc<ServiceRegistry>,
    dht: Arc<DhtStore>,
    router: Arc<Router>,
    pending: Arc<PendingRequests>,
    events: Arc<EventBus>,
    request_timeout: Duration,
}

impl IntentLayer {
    /// Wire up the layer.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: Arc<Identity>,
        cache: Arc<ContentCache>,
        registry: Arc<ServiceRegistry>,
        dht: Arc<DhtStore>,
        router: Arc<Router>,
        pending: Arc<PendingRequests>,
        events: Arc<EventBus>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            cache,
            registry,
            dht,
            router,
            pending,
            events,
            request_timeout,
        }
    }

    /// Local content cache.
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Local service registry.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Publish data: sign, cache, register the provider in the DHT, and
    /// push the provider record to connected peers.
    pub async fn publish(
        &self,
        data: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<ContentEnvelope, IntentError> {
        let envelope = ContentEnvelope::create(&self.identity, data, metadata);
        envelope.verify()?;
        self.cache.insert(envelope.clone());

        let record = DhtRecord::signed(
            &self.identity,
            provider_key(&envelope.cid),
            encode_canonical(&self.identity.node_id()).map_err(|_| IntentError::Codec)?,
            now_ms(),
        );
        // Own store first; failures here are crypto bugs, not peer noise.
        self.dht.put(record.clone()).map_err(|_| IntentError::Codec)?;
        self.push_record(&record).await;

        self.events.emit(
            "intent",
            "content_published",
            detail([
                ("cid", envelope.cid.to_hex()),
                ("bytes", envelope.data.len().to_string()),
            ]),
        );
        Ok(envelope)
    }

    /// Push a DHT record to every directly connected peer (fire and forget).
    pub async fn push_record(&self, record: &DhtRecord) {
        let Ok(payload) = encode_canonical(record) else {
            return;
        };
        for peer in self.router.conn_ids() {
            let msg = Message::new(msg_type::DHT_PUT, peer, payload.clone());
            if let Err(e) = self.router.send_message(msg).await {
                debug!(peer = %peer, err = %e, "dht push failed");
            }
        }
    }

    /// Resolve content: local cache, then a routed request to the DHT
    /// provider. Returns `None` when nobody holds the data.
    pub async fn want(&self, cid: &Cid) -> Result<Option<ContentEnvelope>, IntentError> {
        if let Some(env) = self.cache.get(cid) {
            self.events.emit_kv("intent", "cache_hit", "cid", cid.to_hex());
            return Ok(Some(env));
        }
        self.events.emit_kv("intent", "cache_miss", "cid", cid.to_hex());

        let provider = match self.lookup_provider(cid) {
            Some(p) => p,
            None => match self.remote_provider_lookup(cid).await {
                Some(p) => p,
                None => return Ok(None),
            },
        };
        if provider == self.identity.node_id() {
            return Ok(None);
        }

        let (req_id, rx) = self.pending.register();
        let payload =
            encode_canonical(&WantRequest { req_id, cid: *cid }).map_err(|_| IntentError::Codec)?;
        let msg = Message::new(msg_type::CONTENT_WANT, provider, payload);
        if self.router.send_message(msg).await.is_err() {
            self.pending.abandon(req_id);
            return Err(IntentError::Routing);
        }

        let reply = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(bytes)) => bytes,
            _ => {
                self.pending.abandon(req_id);
                return Err(IntentError::NotFound);
            }
        };
        let resp: WantResponse =
            decode_canonical_limited(&reply, MAX_INTENT_PAYLOAD).map_err(|_| IntentError::Codec)?;
        let Some(envelope) = resp.envelope else {
            return Ok(None);
        };
        envelope.verify()?;
        if envelope.cid != *cid {
            return Err(EnvelopeError::CidMismatch.into());
        }
        self.cache.insert(envelope.clone());
        Ok(Some(envelope))
    }

    fn lookup_provider(&self, cid: &Cid) -> Option<NodeId> {
        let record = self.dht.get(&provider_key(cid))?;
        decode_canonical_limited(&record.value, 256).ok()
    }

    /// Ask directly connected peers for the provider record of a CID.
    /// The first verifiable answer is adopted into the local store.
    async fn remote_provider_lookup(&self, cid: &Cid) -> Option<NodeId> {
        let key = provider_key(cid);
        for peer in self.router.conn_ids() {
            let (req_id, rx) = self.pending.register();
            let Ok(payload) = encode_canonical(&DhtGetRequest { req_id, key }) else {
                self.pending.abandon(req_id);
                continue;
            };
            let msg = Message::new(msg_type::DHT_GET, peer, payload);
            if self.router.send_message(msg).await.is_err() {
                self.pending.abandon(req_id);
                continue;
            }
            match tokio::time::timeout(self.request_timeout, rx).await {
                Ok(Ok(bytes)) => {
                    let Ok(resp) =
                        decode_canonical_limited::<DhtGetResponse>(&bytes, MAX_INTENT_PAYLOAD)
                    else {
                        continue;
                    };
                    let Some(record) = resp.record else {
                        continue;
                    };
                    if self.dht.put(record.clone()).is_err() {
                        continue;
                    }
                    if let Ok(provider) = decode_canonical_limited::<NodeId>(&record.value, 256) {
                        return Some(provider);
                    }
                }
                _ => self.pending.abandon(req_id),
            }
        }
        None
    }

    /// Register a local service and advertise it in the DHT.
    pub async fn register_service(
        &self,
        service: &str,
        capabilities: BTreeMap<String, String>,
        load: f64,
        version: u32,
    ) -> Result<ServiceRecord, IntentError> {
        let record =
            ServiceRecord::signed(&self.identity, service, capabilities, load, version);
        self.registry
            .register_local(record.clone())
            .map_err(|_| IntentError::Codec)?;

        let dht_record = DhtRecord::signed(
            &self.identity,
            services::service_key(service, &self.identity.node_id()),
            encode_canonical(&record).map_err(|_| IntentError::Codec)?,
            now_ms(),
        );
        self.dht
            .put(dht_record.clone())
            .map_err(|_| IntentError::Codec)?;
        self.push_record(&dht_record).await;

        self.events
            .emit_kv("intent", "service_registered", "service", service.to_string());
        Ok(record)
    }

    /// Find providers of a service: local registry merged with answers
    /// from every directly connected peer.
    pub async fn find(&self, service: &str) -> Result<Vec<ServiceRecord>, IntentError> {
        let peers = self.router.conn_ids();
        let mut receivers = Vec::new();
        for peer in peers {
            let (req_id, rx) = self.pending.register();
            let payload = encode_canonical(&ServiceQuery {
                req_id,
                service: service.to_string(),
            })
            .map_err(|_| IntentError::Codec)?;
            let msg = Message::new(msg_type::SERVICE_QUERY, peer, payload);
            if self.router.send_message(msg).await.is_err() {
                self.pending.abandon(req_id);
                continue;
            }
            receivers.push((req_id, rx));
        }

        for (req_id, rx) in receivers {
            match tokio::time::timeout(self.request_timeout, rx).await {
                Ok(Ok(bytes)) => {
                    if let Ok(resp) =
                        decode_canonical_limited::<ServiceResponse>(&bytes, MAX_INTENT_PAYLOAD)
                    {
                        for record in resp.records {
                            let _ = self.registry.observe_remote(record);
                        }
                    }
                }
                _ => self.pending.abandon(req_id),
            }
        }

        Ok(self.registry.providers(service))
    }
}
