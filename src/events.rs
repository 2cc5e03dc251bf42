// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

//! Instrumentation events emitted by every layer of the stack.
//!
//! The bus is a fan-out broadcast channel with a bounded buffer. Emission is
//! strictly non-blocking: a slow observer lags and loses the oldest events,
//! it never backpressures the protocol.

#![forbid(unsafe_code)]

use crate::types::{now_ms, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Default bus buffer size (events per subscriber before lag).
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// One observation record from a stack layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StackEvent {
    /// Per-node monotonically increasing sequence number.
    pub id: u64,
    /// Emitting layer tag (`bifrost`, `mesh`, `veil`, `intent`, `trust`, `app`, `node`).
    pub layer: String,
    /// Event kind within the layer (`route_forward`, `encrypt`, ...).
    pub kind: String,
    /// Emitting node.
    pub node: NodeId,
    /// Free-form detail fields.
    pub detail: BTreeMap<String, String>,
    /// Emission time, ms since UNIX epoch.
    pub ts_ms: u64,
}

/// Fan-out bus handed to every layer at construction.
pub struct EventBus {
    node: NodeId,
    seq: AtomicU64,
    tx: broadcast::Sender<StackEvent>,
}

impl EventBus {
    /// Create a bus with the given buffer capacity.
    pub fn new(node: NodeId, buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            node,
            seq: AtomicU64::new(0),
            tx,
        }
    }

    /// Subscribe an observer. Lagging observers drop the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<StackEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Never blocks; with no subscribers the event is dropped.
    pub fn emit(&self, layer: &str, kind: &str, detail: BTreeMap<String, String>) -> u64 {
        let id = self.seq.fetch_add(1, Ordering::Relaxed);
        let ev = StackEvent {
            id,
            layer: layer.to_string(),
            kind: kind.to_string(),
            node: self.node,
            detail,
            ts_ms: now_ms(),
        };
        let _ = self.tx.send(ev);
        id
    }

    /// Emit with a single detail pair.
    pub fn emit_kv(&self, layer: &str, kind: &str, key: &str, value: String) -> u64 {
        let mut detail = BTreeMap::new();
        detail.insert(key.to_string(), value);
        self.emit(layer, kind, detail)
    }

    /// Number of events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}

/// Build a detail map from key/value pairs.
pub fn detail<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
