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

//! Mesh router: typed message envelopes greedily forwarded over the XOR
//! metric.
//!
//! Wire form is canonical JSON (`type`, `from`, `to`, `payload`, `ttl`;
//! node ids as base58 strings, payload as hex). Forwarding never sends a
//! message back on the connection it arrived on, and a message is never
//! sent with a TTL of zero.

use crate::events::{detail, EventBus};
use crate::mesh::peer_table::PeerTable;
use crate::monitoring::metrics::Metrics;
use crate::types::NodeId;
use crate::veil::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Default hop budget for routed messages.
pub const DEFAULT_TTL: u32 = 10;

/// Size cap for decoded messages (JSON bytes).
pub const MAX_MESSAGE_LEN: usize = 8 * 1024 * 1024;

/// Well-known message types.
pub mod msg_type {
    /// Liveness probe.
    pub const PING: u16 = 1;
    /// Probe reply.
    pub const PONG: u16 = 2;
    /// DHT record request.
    pub const DHT_GET: u16 = 10;
    /// DHT record reply.
    pub const DHT_GET_RESP: u16 = 11;
    /// DHT record push.
    pub const DHT_PUT: u16 = 12;
    /// Content request by CID.
    pub const CONTENT_WANT: u16 = 20;
    /// Content reply.
    pub const CONTENT_RESP: u16 = 21;
    /// Service provider query.
    pub const SERVICE_QUERY: u16 = 30;
    /// Service provider reply.
    pub const SERVICE_RESP: u16 = 31;
    /// RPC request envelope.
    pub const RPC_REQUEST: u16 = 40;
    /// RPC response envelope.
    pub const RPC_RESPONSE: u16 = 41;
    /// LWW register sync push.
    pub const CRDT_SYNC: u16 = 50;
    /// First type value reserved for applications.
    pub const APP_BASE: u16 = 1000;
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Routed message envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message type.
    #[serde(rename = "type")]
    pub msg_type: u16,
    /// Originating node. Set by the router on send.
    pub from: NodeId,
    /// Destination node.
    pub to: NodeId,
    /// Opaque payload bytes.
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    /// Remaining hop budget.
    pub ttl: u32,
}

impl Message {
    /// Build a message addressed to `to`. `from` and a default TTL are
    /// filled in by the router on send.
    pub fn new(msg_type: u16, to: NodeId, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            from: to, // placeholder until send stamps the sender
            to,
            payload,
            ttl: 0,
        }
    }

    /// Canonical JSON encoding.
    pub fn encode(&self) -> Result<Vec<u8>, RouterError> {
        serde_json::to_vec(self).map_err(|_| RouterError::Codec)
    }

    /// Decode from canonical JSON with a size cap.
    pub fn decode(bytes: &[u8]) -> Result<Self, RouterError> {
        if bytes.len() > MAX_MESSAGE_LEN {
            return Err(RouterError::Codec);
        }
        serde_json::from_slice(bytes).map_err(|_| RouterError::Codec)
    }
}

/// Routing errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No connected peer can carry the message closer.
    #[error("no route")]
    NoRoute,
    /// Hop budget exhausted before a forwarding hop.
    #[error("TTL expired")]
    TtlExpired,
    /// The chosen connection failed while sending.
    #[error("transport")]
    Transport,
    /// Message encode/decode failure.
    #[error("codec")]
    Codec,
}

/// Handler invoked for messages addressed to this node. A returned message
/// is routed as the reply. Handlers run on the receive loop and must stay
/// bounded.
pub type Handler = Arc<dyn Fn(&Message) -> Option<Message> + Send + Sync>;

/// In-flight request correlation: request id to reply payload.
pub struct PendingRequests {
    next: std::sync::atomic::AtomicU64,
    waiting: Mutex<HashMap<u64, oneshot::Sender<Vec<u8>>>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    /// Create an empty correlation table.
    pub fn new() -> Self {
        Self {
            next: std::sync::atomic::AtomicU64::new(1),
            waiting: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a request id and a receiver for its reply.
    pub fn register(&self) -> (u64, oneshot::Receiver<Vec<u8>>) {
        let id = self
            .next
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        (id, rx)
    }

    /// Deliver a reply payload. Unknown or timed-out ids are dropped.
    pub fn complete(&self, id: u64, payload: Vec<u8>) {
        let tx = self
            .waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if let Some(tx) = tx {
            let _ = tx.send(payload);
        }
    }

    /// Forget an id after a timeout.
    pub fn abandon(&self, id: u64) {
        self.waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }
}

/// Per-node router owning the connection map and the handler table.
pub struct Router {
    self_id: NodeId,
    default_ttl: u32,
    conns: RwLock<HashMap<NodeId, Arc<Session>>>,
    handlers: RwLock<HashMap<u16, Handler>>,
    peer_table: Arc<PeerTable>,
    events: Arc<EventBus>,
    metrics: Arc<Metrics>,
}

impl Router {
    /// Create a router for `self_id`.
    pub fn new(
        self_id: NodeId,
        default_ttl: u32,
        peer_table: Arc<PeerTable>,
        events: Arc<EventBus>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            self_id,
            default_ttl: default_ttl.max(1),
            conns: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            peer_table,
            events,
            metrics,
        }
    }

    /// This node's id.
    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// Register a handler for a message type, replacing any existing one.
    pub fn register_handler(&self, msg_type: u16, handler: Handler) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(msg_type, handler);
    }

    /// Remove a handler.
    pub fn unregister_handler(&self, msg_type: u16) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&msg_type);
    }

    /// Attach an established session for a peer.
    pub fn register_conn(&self, id: NodeId, session: Arc<Session>) {
        self.conns
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, session);
        self.metrics.peers.set(self.conn_count() as i64);
    }

    /// Detach a peer's session, returning it for shutdown.
    pub fn remove_conn(&self, id: &NodeId) -> Option<Arc<Session>> {
        let removed = self
            .conns
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        self.metrics.peers.set(self.conn_count() as i64);
        removed
    }

    /// Detach a peer's session only if it is still the given one. Keeps a
    /// stale receive loop from tearing down a replacement session.
    pub fn remove_conn_if(&self, id: &NodeId, session: &Arc<Session>) -> bool {
        let removed = {
            let mut conns = self.conns.write().unwrap_or_else(|e| e.into_inner());
            match conns.get(id) {
                Some(current) if Arc::ptr_eq(current, session) => {
                    conns.remove(id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.metrics.peers.set(self.conn_count() as i64);
        }
        removed
    }

    /// Whether a direct connection to `id` exists.
    pub fn has_conn(&self, id: &NodeId) -> bool {
        self.conns
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    /// Session for a directly connected peer.
    pub fn conn(&self, id: &NodeId) -> Option<Arc<Session>> {
        self.conns
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Ids of all directly connected peers.
    pub fn conn_ids(&self) -> Vec<NodeId> {
        self.conns
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    /// Number of direct connections.
    pub fn conn_count(&self) -> usize {
        self.conns.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Send a locally originated message. Stamps the sender and a default
    /// TTL, then routes.
    pub async fn send_message(&self, mut msg: Message) -> Result<(), RouterError> {
        msg.from = self.self_id;
        if msg.ttl == 0 {
            msg.ttl = self.default_ttl;
        }
        self.events.emit(
            "mesh",
            "route_start",
            detail([
                ("to", msg.to.short()),
                ("type", msg.msg_type.to_string()),
            ]),
        );
        self.route(msg, None).await
    }

    /// Core routing step: direct connection first, otherwise greedy forward
    /// toward the closest connected peer (never back out the arrival
    /// connection).
    async fn route(&self, mut msg: Message, exclude: Option<NodeId>) -> Result<(), RouterError> {
        if msg.ttl == 0 {
            return Err(RouterError::TtlExpired);
        }

        if let Some(session) = self.conn(&msg.to) {
            return self.send_on(&session, &msg).await;
        }

        // Forwarding consumes a hop.
        msg.ttl -= 1;
        if msg.ttl == 0 {
            self.events
                .emit_kv("mesh", "ttl_expired", "to", msg.to.short());
            return Err(RouterError::TtlExpired);
        }

        let next = self.pick_next_hop(&msg, exclude).ok_or(RouterError::NoRoute)?;
        let session = self.conn(&next).ok_or(RouterError::NoRoute)?;
        debug!(to = %msg.to, via = %next, ttl = msg.ttl, "forwarding");
        self.send_on(&session, &msg).await
    }

    fn pick_next_hop(&self, msg: &Message, exclude: Option<NodeId>) -> Option<NodeId> {
        let candidates = self
            .peer_table
            .find_closest(&msg.to, self.peer_table.k());
        candidates
            .into_iter()
            .map(|p| p.node_id)
            .find(|id| {
                *id != self.self_id
                    && Some(*id) != exclude
                    && *id != msg.from
                    && self.has_conn(id)
            })
    }

    async fn send_on(&self, session: &Session, msg: &Message) -> Result<(), RouterError> {
        let bytes = msg.encode()?;
        session.send_data(&bytes).await.map_err(|_| {
            self.metrics.messages_dropped_total.inc();
            RouterError::Transport
        })?;
        self.metrics.messages_routed_total.inc();
        Ok(())
    }

    /// Dispatch a message that arrived on the connection to `via`.
    pub async fn handle_incoming(&self, mut msg: Message, via: NodeId) {
        if msg.to == self.self_id {
            self.events.emit(
                "mesh",
                "message_received",
                detail([
                    ("from", msg.from.short()),
                    ("type", msg.msg_type.to_string()),
                ]),
            );
            let handler = {
                let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
                handlers.get(&msg.msg_type).cloned()
            };
            let Some(handler) = handler else {
                debug!(msg_type = msg.msg_type, "no handler; dropping");
                return;
            };
            if let Some(reply) = handler(&msg) {
                if let Err(e) = self.send_message(reply).await {
                    warn!(err = %e, "reply send failed");
                }
            }
            return;
        }

        if msg.ttl == 0 {
            self.events
                .emit_kv("mesh", "ttl_expired", "to", msg.to.short());
            self.metrics.messages_dropped_total.inc();
            return;
        }
        msg.ttl -= 1;
        self.events.emit(
            "mesh",
            "route_forward",
            detail([
                ("to", msg.to.short()),
                ("ttl", msg.ttl.to_string()),
            ]),
        );
        if let Err(e) = self.route(msg, Some(via)).await {
            self.events.emit_kv("mesh", "route_failed", "err", e.to_string());
            self.metrics.messages_dropped_total.inc();
        }
    }
}
