// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

//! Kademlia peer table: 256 k-buckets over the XOR metric.
//!
//! Bucket i holds peers whose most-significant differing bit from self is
//! bit i. A full bucket drops new entries instead of probing the oldest
//! for liveness.

#![forbid(unsafe_code)]

use crate::types::{now_ms, NodeId, PeerInfo};
use std::sync::RwLock;

/// Number of buckets (one per bit of the id space).
pub const BUCKET_COUNT: usize = 256;

/// Default bucket capacity.
pub const DEFAULT_K: usize = 20;

/// Outcome of an insert attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddPeerOutcome {
    /// New entry stored.
    Added,
    /// Existing entry refreshed in place.
    Updated,
    /// Bucket at capacity; entry dropped.
    BucketFull,
    /// Entry named this node itself.
    RejectedSelf,
    /// Entry failed the id/key binding check.
    RejectedBadKey,
}

/// Thread-safe k-bucket table.
pub struct PeerTable {
    self_id: NodeId,
    k: usize,
    buckets: RwLock<Vec<Vec<PeerInfo>>>,
}

impl PeerTable {
    /// Create a table for `self_id` with bucket capacity `k`.
    pub fn new(self_id: NodeId, k: usize) -> Self {
        Self {
            self_id,
            k: k.max(1),
            buckets: RwLock::new(vec![Vec::new(); BUCKET_COUNT]),
        }
    }

    /// Bucket capacity.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Insert or refresh a peer.
    pub fn add_peer(&self, mut info: PeerInfo) -> AddPeerOutcome {
        if info.node_id == self.self_id {
            return AddPeerOutcome::RejectedSelf;
        }
        if !info.verify() {
            return AddPeerOutcome::RejectedBadKey;
        }
        let Some(idx) = self.self_id.bucket_index(&info.node_id) else {
            return AddPeerOutcome::RejectedSelf;
        };
        info.last_seen_ms = now_ms();

        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        let bucket = &mut buckets[idx];
        if let Some(existing) = bucket.iter_mut().find(|p| p.node_id == info.node_id) {
            *existing = info;
            return AddPeerOutcome::Updated;
        }
        if bucket.len() >= self.k {
            return AddPeerOutcome::BucketFull;
        }
        bucket.push(info);
        AddPeerOutcome::Added
    }

    /// Remove a peer. Returns whether it was present.
    pub fn remove_peer(&self, id: &NodeId) -> bool {
        let Some(idx) = self.self_id.bucket_index(id) else {
            return false;
        };
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        let bucket = &mut buckets[idx];
        let before = bucket.len();
        bucket.retain(|p| p.node_id != *id);
        bucket.len() != before
    }

    /// Look up a single peer.
    pub fn get_peer(&self, id: &NodeId) -> Option<PeerInfo> {
        let idx = self.self_id.bucket_index(id)?;
        let buckets = self.buckets.read().unwrap_or_else(|e| e.into_inner());
        buckets[idx].iter().find(|p| p.node_id == *id).cloned()
    }

    /// The `count` peers closest to `target` by XOR distance, ascending.
    /// Ties break on raw id byte order.
    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<PeerInfo> {
        let mut peers = self.all_peers();
        peers.sort_by(|a, b| {
            let da = a.node_id.xor_distance(target);
            let db = b.node_id.xor_distance(target);
            da.cmp(&db)
                .then_with(|| a.node_id.as_bytes().cmp(b.node_id.as_bytes()))
        });
        peers.truncate(count);
        peers
    }

    /// Snapshot of every known peer.
    pub fn all_peers(&self) -> Vec<PeerInfo> {
        let buckets = self.buckets.read().unwrap_or_else(|e| e.into_inner());
        buckets.iter().flatten().cloned().collect()
    }

    /// Total peer count.
    pub fn len(&self) -> usize {
        let buckets = self.buckets.read().unwrap_or_else(|e| e.into_inner());
        buckets.iter().map(Vec::len).sum()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
