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

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container. The registry is exposed from the node; scraping is
/// the embedding application's concern.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Directly connected peers gauge.
    pub peers: IntGauge,
    /// Routed messages sent (originated or forwarded).
    pub messages_routed_total: IntCounter,
    /// Routed messages dropped (TTL, no route, transport).
    pub messages_dropped_total: IntCounter,
    /// Frames rejected by the codec.
    pub invalid_frames_total: IntCounter,
    /// Sessions failed (handshake, AEAD, keepalive).
    pub sessions_failed_total: IntCounter,
    /// RPC requests dispatched.
    pub rpc_requests_total: IntCounter,
    /// RPC dispatches that produced an error response.
    pub rpc_failures_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let peers = IntGauge::new("valhalla_peers", "Directly connected peers")
            .map_err(|_| MetricsError::Prom)?;
        let messages_routed_total =
            IntCounter::new("valhalla_messages_routed_total", "Routed messages sent")
                .map_err(|_| MetricsError::Prom)?;
        let messages_dropped_total =
            IntCounter::new("valhalla_messages_dropped_total", "Routed messages dropped")
                .map_err(|_| MetricsError::Prom)?;
        let invalid_frames_total = IntCounter::new(
            "valhalla_invalid_frames_total",
            "Frames rejected by the codec",
        )
        .map_err(|_| MetricsError::Prom)?;
        let sessions_failed_total = IntCounter::new(
            "valhalla_sessions_failed_total",
            "Failed encrypted sessions",
        )
        .map_err(|_| MetricsError::Prom)?;
        let rpc_requests_total =
            IntCounter::new("valhalla_rpc_requests_total", "RPC requests dispatched")
                .map_err(|_| MetricsError::Prom)?;
        let rpc_failures_total =
            IntCounter::new("valhalla_rpc_failures_total", "RPC error responses")
                .map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(peers.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(messages_routed_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(messages_dropped_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(invalid_frames_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(sessions_failed_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(rpc_requests_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(rpc_failures_total.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            peers,
            messages_routed_total,
            messages_dropped_total,
            invalid_frames_total,
            sessions_failed_total,
            rpc_requests_total,
            rpc_failures_total,
        })
    }
}
