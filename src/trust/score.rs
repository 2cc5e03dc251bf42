// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

//! Transitive trust over the attestation graph.
//!
//! Attestations are directed edges attester -> subject weighted by
//! confidence. The score is the maximum product of edge weights over all
//! paths, decayed per hop past the first; a direct edge returns its raw
//! confidence. Cycles are cut with a visited set, and no path yields 0.

#![forbid(unsafe_code)]

use super::attestation::AttestationStore;
use crate::types::NodeId;
use std::collections::{HashMap, HashSet};

/// Per-hop decay applied past the first edge.
pub const DEFAULT_HOP_DECAY: f64 = 0.9;

/// Longest path considered.
const MAX_DEPTH: usize = 6;

/// Compute trust from `source` to `target` in [0, 1].
pub fn compute_trust(store: &AttestationStore, source: &NodeId, target: &NodeId) -> f64 {
    compute_trust_with_decay(store, source, target, DEFAULT_HOP_DECAY)
}

/// Compute trust with an explicit per-hop decay factor.
pub fn compute_trust_with_decay(
    store: &AttestationStore,
    source: &NodeId,
    target: &NodeId,
    decay: f64,
) -> f64 {
    if source == target {
        return 1.0;
    }

    // Edge map: attester -> [(subject, best confidence)].
    let mut edges: HashMap<NodeId, Vec<(NodeId, f64)>> = HashMap::new();
    for a in store.all() {
        if a.subject == a.attester {
            continue;
        }
        let entry = edges.entry(a.attester).or_default();
        match entry.iter_mut().find(|(subject, _)| *subject == a.subject) {
            Some((_, conf)) => *conf = conf.max(a.confidence),
            None => entry.push((a.subject, a.confidence)),
        }
    }

    let mut visited = HashSet::new();
    visited.insert(*source);
    best_path(&edges, source, target, decay, 1.0, 0, &mut visited)
}

#[allow(clippy::too_many_arguments)]
fn best_path(
    edges: &HashMap<NodeId, Vec<(NodeId, f64)>>,
    from: &NodeId,
    target: &NodeId,
    decay: f64,
    product: f64,
    depth: usize,
    visited: &mut HashSet<NodeId>,
) -> f64 {
    if depth >= MAX_DEPTH {
        return 0.0;
    }
    let Some(outgoing) = edges.get(from) else {
        return 0.0;
    };

    let mut best = 0.0f64;
    for (next, confidence) in outgoing {
        let path_product = product * confidence;
        if *next == *target {
            // hops = depth + 1; the first hop carries no decay.
            let score = path_product * decay.powi(depth as i32);
            best = best.max(score);
            continue;
        }
        if visited.contains(next) {
            continue;
        }
        visited.insert(*next);
        let score = best_path(edges, next, target, decay, path_product, depth + 1, visited);
        visited.remove(next);
        best = best.max(score);
    }
    best.clamp(0.0, 1.0)
}
