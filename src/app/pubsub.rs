// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

//! Topic pub/sub: synchronous local fan-out, no retention.

#![forbid(unsafe_code)]

use crate::types::NodeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Topic handler: `(topic, data, from)`.
pub type TopicHandler = Arc<dyn Fn(&str, &[u8], &NodeId) + Send + Sync>;

/// Handle returned by subscribe, used to unsubscribe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    topic: String,
    id: u64,
}

impl SubscriptionHandle {
    /// Topic this subscription belongs to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Topic subscription table.
pub struct PubSub {
    topics: RwLock<HashMap<String, Vec<(u64, TopicHandler)>>>,
    next_id: AtomicU64,
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub {
    /// Create an empty pub/sub table.
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe a handler to a topic.
    pub fn subscribe(&self, topic: &str, handler: TopicHandler) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        SubscriptionHandle {
            topic: topic.to_string(),
            id,
        }
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        let Some(subs) = topics.get_mut(&handle.topic) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|(id, _)| *id != handle.id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            topics.remove(&handle.topic);
        }
        removed
    }

    /// Deliver to every subscriber synchronously. Returns the count notified.
    pub fn publish(&self, topic: &str, data: &[u8], from: &NodeId) -> usize {
        let handlers: Vec<TopicHandler> = {
            let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
            topics
                .get(topic)
                .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in &handlers {
            handler(topic, data, from);
        }
        handlers.len()
    }

    /// Number of subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).map(Vec::len).unwrap_or(0)
    }
}
