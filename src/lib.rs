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

//! Valhalla - application-level overlay networking stack.
//!
//! Six layers composed into a node:
//! - bifrost: length-prefixed framing over TCP/WebSocket
//! - mesh: Ed25519 identity, Kademlia peer table, signed DHT, router
//! - veil: Noise XX encrypted sessions with stream multiplexing
//! - intent: content-addressed envelopes, LRU cache, service discovery
//! - trust: attestations, capability tokens, transitive trust
//! - app: RPC, topic pub/sub, LWW-register CRDT
//!
//! Every layer emits onto a non-blocking event bus; the network harness
//! runs many nodes in one process over localhost transports.

/// Application primitives (RPC, pub/sub, CRDT).
pub mod app;
/// Framing codec and stream transports.
pub mod bifrost;
/// Event instrumentation bus.
pub mod events;
/// Content-addressed storage and service discovery.
pub mod intent;
/// Identity, peer table, DHT, router.
pub mod mesh;
/// Observability (prometheus metrics).
pub mod monitoring;
/// In-process multi-node harness.
pub mod network;
/// Node composition.
pub mod node;
/// Attestations, capabilities, trust scoring.
pub mod trust;
/// Shared identifiers and canonical codecs.
pub mod types;
/// Noise-encrypted stream layer.
pub mod veil;

pub use events::StackEvent;
pub use network::Network;
pub use node::{Node, NodeConfig, NodeError, NodeState};
pub use types::{NodeId, PathAddr, PeerInfo};
