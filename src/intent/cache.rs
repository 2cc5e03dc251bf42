// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

//! Bounded LRU cache for content envelopes.
//!
//! Recency is a monotonic access counter; eviction scans for the minimum.
//! At the default capacity (1000 entries) the scan is cheaper than keeping
//! an order list coherent. Evictions are silent.

#![forbid(unsafe_code)]

use super::cid::{Cid, ContentEnvelope};
use std::collections::HashMap;
use std::sync::RwLock;

/// Default cache capacity in entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

struct CacheInner {
    entries: HashMap<Cid, (ContentEnvelope, u64)>,
    tick: u64,
}

/// Thread-safe LRU over content envelopes.
pub struct ContentCache {
    capacity: usize,
    inner: RwLock<CacheInner>,
}

impl ContentCache {
    /// Create a cache bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Fetch an envelope, promoting it to most-recently-used.
    pub fn get(&self, cid: &Cid) -> Option<ContentEnvelope> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.tick += 1;
        let tick = inner.tick;
        let (env, last_used) = inner.entries.get_mut(cid)?;
        *last_used = tick;
        Some(env.clone())
    }

    /// Insert an envelope, evicting the least-recently-used on overflow.
    pub fn insert(&self, env: ContentEnvelope) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.tick += 1;
        let tick = inner.tick;
        if !inner.entries.contains_key(&env.cid) && inner.entries.len() >= self.capacity {
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(cid, _)| *cid)
            {
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(env.cid, (env, tick));
    }

    /// Whether a CID is cached (no promotion).
    pub fn contains(&self, cid: &Cid) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.contains_key(cid)
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
