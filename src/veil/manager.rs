// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

//! Session establishment: address resolution, dial, handshake.
//!
//! Address resolution order: peer table, then a signed DHT location
//! record, then the in-process address book (seeded by the network
//! harness when many nodes share a process).

#![forbid(unsafe_code)]

use crate::bifrost::{self, ConnReader, ConnWriter};
use crate::events::{detail, EventBus};
use crate::mesh::dht::{self, DhtStore};
use crate::mesh::identity::Identity;
use crate::mesh::peer_table::PeerTable;
use crate::veil::handshake;
use crate::veil::session::Session;
use crate::veil::VeilError;
use crate::types::{NodeId, PathAddr};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// A freshly established session plus its read half. The caller registers
/// the session with the router and spawns the receive loop.
pub struct Established {
    /// Authenticated session (owns the write half).
    pub session: Arc<Session>,
    /// Read half for the caller's receive loop.
    pub reader: ConnReader,
}

/// Dial/handshake tunables.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Dial deadline.
    pub dial_timeout: Duration,
    /// Handshake deadline.
    pub handshake_timeout: Duration,
    /// Frame length bound for new connections.
    pub max_frame_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            max_frame_len: bifrost::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Builds authenticated sessions for the node.
pub struct SessionManager {
    identity: Arc<Identity>,
    peer_table: Arc<PeerTable>,
    dht: Arc<DhtStore>,
    address_book: RwLock<HashMap<NodeId, PathAddr>>,
    events: Arc<EventBus>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a manager.
    pub fn new(
        identity: Arc<Identity>,
        peer_table: Arc<PeerTable>,
        dht: Arc<DhtStore>,
        events: Arc<EventBus>,
        config: SessionConfig,
    ) -> Self {
        Self {
            identity,
            peer_table,
            dht,
            address_book: RwLock::new(HashMap::new()),
            events,
            config,
        }
    }

    /// Seed an out-of-band address (harness demo mode).
    pub fn set_address(&self, id: NodeId, addr: PathAddr) {
        self.address_book
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, addr);
    }

    /// Resolve a dialable address for `target`.
    pub fn resolve_addr(&self, target: &NodeId) -> Option<PathAddr> {
        if let Some(peer) = self.peer_table.get_peer(target) {
            if let Some(addr) = peer.addrs.first() {
                return Some(addr.clone());
            }
        }
        if let Some(record) = self.dht.get(target.as_bytes()) {
            if let Ok(addrs) = dht::resolve_location(&record) {
                if let Some(addr) = addrs.into_iter().next() {
                    return Some(addr);
                }
            }
        }
        self.address_book
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(target)
            .cloned()
    }

    /// Dial `target`, handshake, and return the session halves.
    pub async fn dial_session(&self, target: NodeId) -> Result<Established, VeilError> {
        let addr = self.resolve_addr(&target).ok_or(VeilError::NoAddress)?;
        self.dial_addr(&addr, Some(target)).await
    }

    /// Dial a concrete address, optionally pinning the expected peer id.
    pub async fn dial_addr(
        &self,
        addr: &PathAddr,
        expected: Option<NodeId>,
    ) -> Result<Established, VeilError> {
        debug!(addr = %addr, "dialing");
        let (mut reader, mut writer) = bifrost::dial(
            addr,
            self.config.dial_timeout,
            self.config.max_frame_len,
        )
        .await?;

        let outcome = tokio::time::timeout(
            self.config.handshake_timeout,
            handshake::initiate(&mut reader, &mut writer, &self.identity, expected),
        )
        .await
        .map_err(|_| VeilError::Timeout)??;

        Ok(self.finish(outcome, reader, writer))
    }

    /// Complete the responder side of an accepted connection.
    pub async fn accept_session(
        &self,
        mut reader: ConnReader,
        mut writer: ConnWriter,
    ) -> Result<Established, VeilError> {
        let outcome = tokio::time::timeout(
            self.config.handshake_timeout,
            handshake::respond(&mut reader, &mut writer, &self.identity),
        )
        .await
        .map_err(|_| VeilError::Timeout)??;

        Ok(self.finish(outcome, reader, writer))
    }

    fn finish(
        &self,
        outcome: handshake::HandshakeOutcome,
        reader: ConnReader,
        writer: ConnWriter,
    ) -> Established {
        self.events.emit(
            "veil",
            "handshake_complete",
            detail([("peer", outcome.peer_id.short())]),
        );
        let session = Arc::new(Session::new(
            outcome.peer_id,
            outcome.peer_public_key,
            outcome.transport,
            writer,
            Arc::clone(&self.events),
        ));
        Established { session, reader }
    }
}
