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

//! Node composition: one identity, six layers, one event bus.
//!
//! The node wires protocol handlers into the mesh router, owns the accept
//! loop and the per-connection receive and keepalive loops, and exposes
//! the operations external collaborators call (connect, RPC, publish,
//! events, introspection). Every owned task honors the node's
//! cancellation token; `stop` returns once they have all exited.

use crate::app::{LwwStore, PubSub, RegisterSync, RpcRequest, RpcResponse, RpcRouter, TopicHandler};
use crate::bifrost::{self, BridgeError, ConnReader, FrameType, Listener};
use crate::events::{detail, EventBus, StackEvent, DEFAULT_EVENT_BUFFER};
use crate::intent::{
    ContentCache, ContentEnvelope, IntentError, IntentLayer, ServiceQuery, ServiceRecord,
    ServiceRegistry, ServiceResponse, WantRequest, WantResponse, Cid, DEFAULT_CACHE_CAPACITY,
};
use crate::mesh::dht::{self, DhtGetRequest, DhtGetResponse, DhtRecord, DhtStore};
use crate::mesh::identity::{Identity, IdentityError};
use crate::mesh::peer_table::{PeerTable, DEFAULT_K};
use crate::mesh::router::{
    msg_type, Message, PendingRequests, Router, RouterError, DEFAULT_TTL,
};
use crate::monitoring::metrics::Metrics;
use crate::trust::AttestationStore;
use crate::types::{
    decode_canonical_limited, encode_canonical, now_ms, NodeId, PathAddr, PeerInfo,
};
use crate::veil::manager::{Established, SessionConfig, SessionManager};
use crate::veil::session::Session;
use crate::veil::VeilError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Node-level errors.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Identity load/creation failure (fatal at start).
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),
    /// Transport failure.
    #[error("transport: {0}")]
    Transport(#[from] BridgeError),
    /// Session failure.
    #[error("session: {0}")]
    Session(#[from] VeilError),
    /// Routing failure.
    #[error("routing: {0}")]
    Routing(#[from] RouterError),
    /// Intent failure.
    #[error("intent: {0}")]
    Intent(#[from] IntentError),
    /// Bad arguments.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// RPC did not complete in time.
    #[error("rpc timeout")]
    RpcTimeout,
    /// Payload codec failure.
    #[error("codec")]
    Codec,
    /// The node is not running.
    #[error("not started")]
    NotStarted,
}

/// Node tunables. `Default` matches the documented defaults.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Listen address (`/tcp/host:port`, port 0 binds ephemerally).
    pub listen_addr: PathAddr,
    /// Frame length bound.
    pub max_frame_len: usize,
    /// Content cache capacity (entries).
    pub cache_capacity: usize,
    /// k-bucket capacity.
    pub bucket_k: usize,
    /// Default TTL for routed messages.
    pub default_ttl: u32,
    /// Dial deadline.
    pub dial_timeout: Duration,
    /// Handshake deadline.
    pub handshake_timeout: Duration,
    /// Deadline for routed request/response exchanges.
    pub request_timeout: Duration,
    /// Keepalive probe interval.
    pub keepalive_interval: Duration,
    /// Missed intervals before a session is failed.
    pub keepalive_misses: u32,
    /// Event bus buffer.
    pub event_buffer: usize,
    /// Identity file path; `None` keeps the identity in memory only.
    pub identity_path: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: PathAddr::tcp("127.0.0.1:0"),
            max_frame_len: bifrost::DEFAULT_MAX_FRAME_LEN,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            bucket_k: DEFAULT_K,
            default_ttl: DEFAULT_TTL,
            dial_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(15),
            keepalive_misses: 3,
            event_buffer: DEFAULT_EVENT_BUFFER,
            identity_path: None,
        }
    }
}

/// Serializable snapshot of a node's externally visible state.
#[derive(Clone, Debug, Serialize)]
pub struct NodeState {
    /// Full node id (base58).
    pub node_id: NodeId,
    /// Short id.
    pub short_id: String,
    /// Bound listen address, when started.
    pub listen_addr: Option<PathAddr>,
    /// Directly connected peers.
    pub connected_peers: Vec<NodeId>,
    /// Peer table population.
    pub known_peers: usize,
    /// Registered RPC services.
    pub services: Vec<String>,
    /// Content cache population.
    pub cache_size: usize,
    /// DHT record count.
    pub dht_size: usize,
    /// CRDT keys.
    pub crdt_keys: Vec<String>,
    /// Events emitted so far.
    pub events_emitted: u64,
}

/// One logical overlay node.
pub struct Node {
    identity: Arc<Identity>,
    config: NodeConfig,
    events: Arc<EventBus>,
    metrics: Arc<Metrics>,
    peer_table: Arc<PeerTable>,
    dht: Arc<DhtStore>,
    router: Arc<Router>,
    sessions: Arc<SessionManager>,
    intent: Arc<IntentLayer>,
    trust: Arc<AttestationStore>,
    rpc: Arc<RpcRouter>,
    pubsub: Arc<PubSub>,
    crdt: Arc<LwwStore>,
    pending: Arc<PendingRequests>,
    cancel: CancellationToken,
    listen_addr: RwLock<Option<PathAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    weak_self: Weak<Node>,
}

impl Node {
    /// Build a node from config. Identity file corruption is fatal here.
    pub fn new(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        let identity = Arc::new(match &config.identity_path {
            Some(path) => Identity::load_or_create(path)?,
            None => Identity::generate()?,
        });
        let node_id = identity.node_id();

        let events = Arc::new(EventBus::new(node_id, config.event_buffer));
        let metrics =
            Arc::new(Metrics::new().map_err(|_| NodeError::InvalidInput("metrics".into()))?);
        let peer_table = Arc::new(PeerTable::new(node_id, config.bucket_k));
        let dht = Arc::new(DhtStore::new());
        let router = Arc::new(Router::new(
            node_id,
            config.default_ttl,
            Arc::clone(&peer_table),
            Arc::clone(&events),
            Arc::clone(&metrics),
        ));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&identity),
            Arc::clone(&peer_table),
            Arc::clone(&dht),
            Arc::clone(&events),
            SessionConfig {
                dial_timeout: config.dial_timeout,
                handshake_timeout: config.handshake_timeout,
                max_frame_len: config.max_frame_len,
            },
        ));
        let cache = Arc::new(ContentCache::new(config.cache_capacity));
        let registry = Arc::new(ServiceRegistry::new());
        let pending = Arc::new(PendingRequests::new());
        let intent = Arc::new(IntentLayer::new(
            Arc::clone(&identity),
            Arc::clone(&cache),
            Arc::clone(&registry),
            Arc::clone(&dht),
            Arc::clone(&router),
            Arc::clone(&pending),
            Arc::clone(&events),
            config.request_timeout,
        ));

        let node = Arc::new_cyclic(|weak: &Weak<Node>| Self {
            crdt: Arc::new(LwwStore::new(node_id)),
            identity,
            config,
            events,
            metrics,
            peer_table,
            dht,
            router,
            sessions,
            intent,
            trust: Arc::new(AttestationStore::new()),
            rpc: Arc::new(RpcRouter::new()),
            pubsub: Arc::new(PubSub::new()),
            pending,
            cancel: CancellationToken::new(),
            listen_addr: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            weak_self: weak.clone(),
        });
        node.install_handlers();
        Ok(node)
    }

    /// Strong handle to self for task spawning. The node is alive for as
    /// long as any `&self` borrow exists.
    fn strong(&self) -> Option<Arc<Node>> {
        self.weak_self.upgrade()
    }

    // ---- introspection -------------------------------------------------

    /// Node id.
    pub fn node_id(&self) -> NodeId {
        self.identity.node_id()
    }

    /// Short display id.
    pub fn short_id(&self) -> String {
        self.identity.short_id()
    }

    /// This node's own peer record (for handing to other nodes).
    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            node_id: self.node_id(),
            public_key: self.identity.public_key(),
            addrs: self.listen_addr().into_iter().collect(),
            last_seen_ms: now_ms(),
        }
    }

    /// Bound listen address, when started.
    pub fn listen_addr(&self) -> Option<PathAddr> {
        self.listen_addr
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Ids of directly connected peers.
    pub fn peers(&self) -> Vec<NodeId> {
        self.router.conn_ids()
    }

    /// The mesh peer table.
    pub fn peer_table(&self) -> &Arc<PeerTable> {
        &self.peer_table
    }

    /// The DHT store.
    pub fn dht(&self) -> &Arc<DhtStore> {
        &self.dht
    }

    /// The RPC service router.
    pub fn rpc_router(&self) -> &Arc<RpcRouter> {
        &self.rpc
    }

    /// The pub/sub table.
    pub fn pubsub(&self) -> &Arc<PubSub> {
        &self.pubsub
    }

    /// The LWW register store.
    pub fn crdt(&self) -> &Arc<LwwStore> {
        &self.crdt
    }

    /// The attestation store.
    pub fn trust_store(&self) -> &Arc<AttestationStore> {
        &self.trust
    }

    /// The content cache.
    pub fn cache(&self) -> &Arc<ContentCache> {
        self.intent.cache()
    }

    /// The intent layer.
    pub fn intent(&self) -> &Arc<IntentLayer> {
        &self.intent
    }

    /// The session manager (address seeding lives here).
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Metrics registry.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Subscribe to the event stream.
    pub fn events(&self) -> broadcast::Receiver<StackEvent> {
        self.events.subscribe()
    }

    /// Emit an application-level event.
    pub fn emit_event(&self, layer: &str, kind: &str, detail: BTreeMap<String, String>) {
        self.events.emit(layer, kind, detail);
    }

    /// Serializable snapshot of the node.
    pub fn full_state(&self) -> NodeState {
        NodeState {
            node_id: self.node_id(),
            short_id: self.short_id(),
            listen_addr: self.listen_addr(),
            connected_peers: self.peers(),
            known_peers: self.peer_table.len(),
            services: self.rpc.list_services(),
            cache_size: self.cache().len(),
            dht_size: self.dht.len(),
            crdt_keys: self.crdt.keys(),
            events_emitted: self.events.emitted(),
        }
    }

    // ---- lifecycle -----------------------------------------------------

    /// Bind the listener and spawn the accept loop.
    pub async fn start(&self) -> Result<(), NodeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let listener = bifrost::listen(&self.config.listen_addr, self.config.max_frame_len).await?;
        let bound = listener.local_addr()?;
        let scheme = self
            .config
            .listen_addr
            .scheme()
            .unwrap_or("tcp")
            .to_string();
        let addr = PathAddr(format!("/{scheme}/{bound}"));
        *self.listen_addr.write().unwrap_or_else(|e| e.into_inner()) = Some(addr.clone());

        // Advertise our own location record locally; peers receive it on push.
        if let Ok(record) = dht::make_location_record(&self.identity, vec![addr.clone()], now_ms())
        {
            let _ = self.dht.put(record);
        }

        let node = self.strong().ok_or(NodeError::NotStarted)?;
        let handle = tokio::spawn(async move {
            node.accept_loop(listener).await;
        });
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);

        info!(node = %self.short_id(), addr = %addr, "node started");
        self.events
            .emit_kv("node", "started", "addr", addr.0.clone());
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: Listener) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((reader, writer, remote)) => {
                            debug!(remote = %remote, "inbound connection");
                            let node = Arc::clone(&self);
                            let handle = tokio::spawn(async move {
                                match node.sessions.accept_session(reader, writer).await {
                                    Ok(established) => node.register_peer(established, None),
                                    Err(e) => {
                                        node.metrics.sessions_failed_total.inc();
                                        node.events.emit_kv(
                                            "veil",
                                            "handshake_failed",
                                            "err",
                                            e.to_string(),
                                        );
                                    }
                                }
                            });
                            self.tasks
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .push(handle);
                        }
                        Err(_) => break,
                    }
                }
            }
        }
    }

    /// Stop the node: cancel loops, close sessions, wait for owned tasks.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        for id in self.router.conn_ids() {
            if let Some(session) = self.router.remove_conn(&id) {
                session.close().await;
            }
        }
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.events.emit_kv("node", "stopped", "id", self.short_id());
        info!(node = %self.short_id(), "node stopped");
    }

    // ---- connections ---------------------------------------------------

    /// Connect to a known peer: dial, handshake, register, spawn loops.
    pub async fn connect_peer(&self, peer: PeerInfo) -> Result<(), NodeError> {
        if peer.node_id == self.node_id() {
            return Err(NodeError::InvalidInput("cannot connect to self".into()));
        }
        if !peer.verify() {
            return Err(NodeError::InvalidInput("peer id/key mismatch".into()));
        }
        if self.router.has_conn(&peer.node_id) {
            return Ok(());
        }
        self.peer_table.add_peer(peer.clone());
        let established = self.sessions.dial_session(peer.node_id).await?;
        self.register_peer(established, peer.addrs.first().cloned());
        Ok(())
    }

    /// Tear down the connection to `id` and drop it from the peer table.
    pub async fn disconnect_peer(&self, id: &NodeId) -> Result<(), NodeError> {
        let Some(session) = self.router.remove_conn(id) else {
            self.peer_table.remove_peer(id);
            return Ok(());
        };
        session.close().await;
        self.peer_table.remove_peer(id);
        self.events
            .emit_kv("node", "peer_disconnected", "peer", id.short());
        Ok(())
    }

    /// Ensure an encrypted session to `target` exists, dialing if needed.
    pub async fn ensure_session(&self, target: &NodeId) -> Result<(), NodeError> {
        if self.router.has_conn(target) {
            return Ok(());
        }
        let established = self.sessions.dial_session(*target).await?;
        self.register_peer(established, None);
        Ok(())
    }

    fn register_peer(&self, established: Established, addr: Option<PathAddr>) {
        let Established { session, reader } = established;
        let remote = session.remote();
        self.peer_table.add_peer(PeerInfo {
            node_id: remote,
            public_key: session.remote_public_key(),
            addrs: addr.into_iter().collect(),
            last_seen_ms: now_ms(),
        });
        self.router.register_conn(remote, Arc::clone(&session));
        self.events
            .emit_kv("node", "peer_connected", "peer", remote.short());

        let Some(node) = self.strong() else {
            return;
        };
        let recv_session = Arc::clone(&session);
        let recv_node = Arc::clone(&node);
        let recv = tokio::spawn(async move {
            recv_node.receive_loop(recv_session, reader).await;
        });
        let keepalive = tokio::spawn(async move {
            node.keepalive_loop(session).await;
        });
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(recv);
        tasks.push(keepalive);
    }

    async fn receive_loop(self: Arc<Self>, session: Arc<Session>, mut reader: ConnReader) {
        let remote = session.remote();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = reader.receive() => {
                    let frame = match received {
                        Ok(frame) => frame,
                        Err(BridgeError::Closed) => break,
                        Err(BridgeError::Frame(e)) => {
                            self.metrics.invalid_frames_total.inc();
                            self.events.emit(
                                "bifrost",
                                "protocol_violation",
                                detail([("peer", remote.short()), ("err", e.to_string())]),
                            );
                            break;
                        }
                        Err(_) => break,
                    };
                    match frame.frame_type {
                        FrameType::Data => {
                            let stream_frame = match session.open_data(&frame.payload) {
                                Ok(sf) => sf,
                                Err(e) => {
                                    self.metrics.sessions_failed_total.inc();
                                    self.events.emit(
                                        "veil",
                                        "decrypt_failed",
                                        detail([("peer", remote.short()), ("err", e.to_string())]),
                                    );
                                    break;
                                }
                            };
                            match Message::decode(&stream_frame.data) {
                                Ok(msg) => self.router.handle_incoming(msg, remote).await,
                                Err(_) => {
                                    self.metrics.invalid_frames_total.inc();
                                    self.events.emit_kv(
                                        "mesh",
                                        "protocol_violation",
                                        "peer",
                                        remote.short(),
                                    );
                                    break;
                                }
                            }
                        }
                        FrameType::Keepalive => session.touch_rx(),
                        FrameType::Close => break,
                        FrameType::Control => session.touch_rx(),
                    }
                }
            }
        }
        session.mark_closed();
        if self.router.remove_conn_if(&remote, &session) {
            self.events
                .emit_kv("node", "peer_disconnected", "peer", remote.short());
        }
    }

    async fn keepalive_loop(self: Arc<Self>, session: Arc<Session>) {
        let interval = self.config.keepalive_interval;
        let deadline_ms = interval.as_millis() as u64 * self.config.keepalive_misses as u64;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if session.is_closed() {
                        break;
                    }
                    let idle = now_ms().saturating_sub(session.last_rx_ms());
                    if deadline_ms > 0 && idle > deadline_ms {
                        self.metrics.sessions_failed_total.inc();
                        self.events.emit_kv(
                            "veil",
                            "keepalive_timeout",
                            "peer",
                            session.remote().short(),
                        );
                        let remote = session.remote();
                        if self.router.remove_conn_if(&remote, &session) {
                            session.close().await;
                        }
                        break;
                    }
                    if session.send_keepalive().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // ---- operations ----------------------------------------------------

    /// Call `service/method` on `target` and await the response.
    pub async fn send_rpc(
        &self,
        target: &NodeId,
        service: &str,
        method: &str,
        args: Vec<u8>,
    ) -> Result<RpcResponse, NodeError> {
        if !self.router.has_conn(target) {
            self.ensure_session(target).await?;
        }

        let (req_id, rx) = self.pending.register();
        let request = RpcRequest {
            id: req_id,
            service: service.to_string(),
            method: method.to_string(),
            args,
            from: self.node_id(),
        };
        let payload = request.encode().map_err(|_| NodeError::Codec)?;
        let msg = Message::new(msg_type::RPC_REQUEST, *target, payload);
        if let Err(e) = self.router.send_message(msg).await {
            self.pending.abandon(req_id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(bytes)) => RpcResponse::decode(&bytes).map_err(|_| NodeError::Codec),
            _ => {
                self.pending.abandon(req_id);
                Err(NodeError::RpcTimeout)
            }
        }
    }

    /// Publish content and register this node as its provider.
    pub async fn publish_content(
        &self,
        data: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<ContentEnvelope, NodeError> {
        Ok(self.intent.publish(data, metadata).await?)
    }

    /// Resolve content by CID (cache first, then the provider).
    pub async fn get_content(&self, cid: &Cid) -> Result<Option<ContentEnvelope>, NodeError> {
        Ok(self.intent.want(cid).await?)
    }

    /// Register a local RPC service and advertise it for discovery.
    pub async fn register_service(
        &self,
        service: &str,
        capabilities: BTreeMap<String, String>,
        handler: crate::app::RpcHandler,
    ) -> Result<ServiceRecord, NodeError> {
        self.rpc.register_service(service, handler);
        Ok(self
            .intent
            .register_service(service, capabilities, 0.0, 1)
            .await?)
    }

    /// Subscribe a handler to a topic.
    pub fn subscribe(&self, topic: &str, handler: TopicHandler) -> crate::app::SubscriptionHandle {
        self.pubsub.subscribe(topic, handler)
    }

    /// Measure round-trip time to a directly reachable peer.
    pub async fn ping(&self, target: &NodeId) -> Result<Duration, NodeError> {
        let (req_id, rx) = self.pending.register();
        let payload = encode_canonical(&req_id).map_err(|_| NodeError::Codec)?;
        let started = std::time::Instant::now();
        let msg = Message::new(msg_type::PING, *target, payload);
        if let Err(e) = self.router.send_message(msg).await {
            self.pending.abandon(req_id);
            return Err(e.into());
        }
        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(_)) => Ok(started.elapsed()),
            _ => {
                self.pending.abandon(req_id);
                Err(NodeError::RpcTimeout)
            }
        }
    }

    /// Write a CRDT register and push it to every connected peer.
    pub async fn crdt_set(&self, key: &str, value: Vec<u8>) -> Result<(), NodeError> {
        let register = self.crdt.set(key, value);
        let payload = encode_canonical(&RegisterSync {
            key: key.to_string(),
            register,
        })
        .map_err(|_| NodeError::Codec)?;
        for peer in self.router.conn_ids() {
            let msg = Message::new(msg_type::CRDT_SYNC, peer, payload.clone());
            if let Err(e) = self.router.send_message(msg).await {
                debug!(peer = %peer, err = %e, "crdt push failed");
            }
        }
        Ok(())
    }

    /// Send a routed mesh message (sender and TTL are stamped on send).
    pub async fn send_message(&self, msg: Message) -> Result<(), NodeError> {
        Ok(self.router.send_message(msg).await?)
    }

    /// Register a mesh message handler.
    pub fn register_message_handler(&self, msg_type: u16, handler: crate::mesh::router::Handler) {
        self.router.register_handler(msg_type, handler);
    }

    // ---- protocol handlers --------------------------------------------

    fn install_handlers(&self) {
        let router = &self.router;

        // PING: echo the payload back.
        router.register_handler(msg_type::PING, {
            Arc::new(move |msg: &Message| {
                Some(Message::new(msg_type::PONG, msg.from, msg.payload.clone()))
            })
        });

        // PONG and the *_RESP types complete pending requests.
        for resp_type in [
            msg_type::PONG,
            msg_type::DHT_GET_RESP,
            msg_type::CONTENT_RESP,
            msg_type::SERVICE_RESP,
        ] {
            let pending = Arc::clone(&self.pending);
            router.register_handler(resp_type, {
                Arc::new(move |msg: &Message| {
                    if let Some(req_id) = leading_req_id(&msg.payload) {
                        pending.complete(req_id, msg.payload.clone());
                    }
                    None
                })
            });
        }

        // RPC_RESPONSE carries its id inside the response body.
        {
            let pending = Arc::clone(&self.pending);
            router.register_handler(msg_type::RPC_RESPONSE, {
                Arc::new(move |msg: &Message| {
                    if let Ok(resp) = RpcResponse::decode(&msg.payload) {
                        pending.complete(resp.id, msg.payload.clone());
                    }
                    None
                })
            });
        }

        // DHT_GET: answer from the local store.
        {
            let dht = Arc::clone(&self.dht);
            router.register_handler(msg_type::DHT_GET, {
                Arc::new(move |msg: &Message| {
                    let request: DhtGetRequest =
                        decode_canonical_limited(&msg.payload, 4096).ok()?;
                    let response = DhtGetResponse {
                        req_id: request.req_id,
                        record: dht.get(&request.key),
                    };
                    let payload = encode_canonical(&response).ok()?;
                    Some(Message::new(msg_type::DHT_GET_RESP, msg.from, payload))
                })
            });
        }

        // DHT_PUT: verify and store; bad records only produce an event.
        {
            let dht = Arc::clone(&self.dht);
            let events = Arc::clone(&self.events);
            router.register_handler(msg_type::DHT_PUT, {
                Arc::new(move |msg: &Message| {
                    match decode_canonical_limited::<DhtRecord>(&msg.payload, 1 << 20) {
                        Ok(record) => {
                            if let Err(e) = dht.put(record) {
                                events.emit_kv("mesh", "dht_put_rejected", "err", e.to_string());
                            }
                        }
                        Err(_) => {
                            events.emit_kv("mesh", "dht_put_rejected", "err", "codec".into());
                        }
                    }
                    None
                })
            });
        }

        // CONTENT_WANT: serve from the cache.
        {
            let cache = Arc::clone(self.intent.cache());
            let events = Arc::clone(&self.events);
            router.register_handler(msg_type::CONTENT_WANT, {
                Arc::new(move |msg: &Message| {
                    let request: WantRequest =
                        decode_canonical_limited(&msg.payload, 4096).ok()?;
                    let envelope = cache.get(&request.cid);
                    if envelope.is_some() {
                        events.emit_kv("intent", "content_served", "cid", request.cid.to_hex());
                    }
                    let response = WantResponse {
                        req_id: request.req_id,
                        envelope,
                    };
                    let payload = encode_canonical(&response).ok()?;
                    Some(Message::new(msg_type::CONTENT_RESP, msg.from, payload))
                })
            });
        }

        // SERVICE_QUERY: answer with verified records for the name.
        {
            let registry = Arc::clone(self.intent.registry());
            router.register_handler(msg_type::SERVICE_QUERY, {
                Arc::new(move |msg: &Message| {
                    let query: ServiceQuery = decode_canonical_limited(&msg.payload, 4096).ok()?;
                    let response = ServiceResponse {
                        req_id: query.req_id,
                        records: registry.providers(&query.service),
                    };
                    let payload = encode_canonical(&response).ok()?;
                    Some(Message::new(msg_type::SERVICE_RESP, msg.from, payload))
                })
            });
        }

        // CRDT_SYNC: merge the pushed register under the LWW rule.
        {
            let crdt = Arc::clone(&self.crdt);
            let events = Arc::clone(&self.events);
            router.register_handler(msg_type::CRDT_SYNC, {
                Arc::new(move |msg: &Message| {
                    let sync: RegisterSync =
                        decode_canonical_limited(&msg.payload, 1 << 20).ok()?;
                    let applied = crdt.set_with_timestamp(&sync.key, sync.register);
                    if applied {
                        events.emit_kv("app", "crdt_merge", "key", sync.key);
                    }
                    None
                })
            });
        }

        // RPC_REQUEST: dispatch and answer.
        {
            let rpc = Arc::clone(&self.rpc);
            let metrics = Arc::clone(&self.metrics);
            let events = Arc::clone(&self.events);
            router.register_handler(msg_type::RPC_REQUEST, {
                Arc::new(move |msg: &Message| {
                    let request = RpcRequest::decode(&msg.payload).ok()?;
                    metrics.rpc_requests_total.inc();
                    let response = rpc.dispatch(&request);
                    if response.error.is_some() {
                        metrics.rpc_failures_total.inc();
                    }
                    events.emit(
                        "app",
                        "rpc_dispatch",
                        detail([
                            ("service", request.service.clone()),
                            ("method", request.method.clone()),
                            ("from", request.from.short()),
                        ]),
                    );
                    let payload = response.encode().ok()?;
                    Some(Message::new(msg_type::RPC_RESPONSE, msg.from, payload))
                })
            });
        }
    }
}

/// Pull the leading canonical u64 request id out of a response body.
///
/// Every intent/DHT wire struct starts with `req_id: u64`, which the
/// canonical encoding lays out as 8 fixed little-endian bytes.
fn leading_req_id(payload: &[u8]) -> Option<u64> {
    if payload.len() < 8 {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&payload[..8]);
    Some(u64::from_le_bytes(bytes))
}
