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

//! In-process multi-node harness.
//!
//! Creates N started nodes on localhost, seeds each node's address book
//! with every other node's listen address (the demo-mode stand-in for a
//! cross-process DHT walk), and drives pairwise connect, disconnect, and
//! reconnect.

use crate::node::{Node, NodeConfig, NodeError, NodeState};
use crate::types::{NodeId, PathAddr};
use std::sync::Arc;

/// A set of in-process nodes wired over localhost TCP.
pub struct Network {
    nodes: Vec<Arc<Node>>,
}

impl Network {
    /// Create and start `count` nodes. `base_port` 0 binds ephemeral ports;
    /// otherwise node i listens on `base_port + i`.
    pub async fn new(count: usize, base_port: u16) -> Result<Self, NodeError> {
        let mut nodes = Vec::with_capacity(count);
        for i in 0..count {
            let port = if base_port == 0 {
                0
            } else {
                base_port + i as u16
            };
            let config = NodeConfig {
                listen_addr: PathAddr::tcp(&format!("127.0.0.1:{port}")),
                ..NodeConfig::default()
            };
            let node = Node::new(config)?;
            node.start().await?;
            nodes.push(node);
        }

        // Demo-mode address book: every node can resolve every other.
        for node in &nodes {
            for other in &nodes {
                if node.node_id() == other.node_id() {
                    continue;
                }
                if let Some(addr) = other.listen_addr() {
                    node.sessions().set_address(other.node_id(), addr);
                }
            }
        }

        Ok(Self { nodes })
    }

    /// Node by index.
    pub fn node(&self, i: usize) -> Option<&Arc<Node>> {
        self.nodes.get(i)
    }

    /// Node by id.
    pub fn node_by_id(&self, id: &NodeId) -> Option<&Arc<Node>> {
        self.nodes.iter().find(|n| n.node_id() == *id)
    }

    /// Number of nodes.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Connect node `i` to node `j` (i dials).
    pub async fn connect_pair(&self, i: usize, j: usize) -> Result<(), NodeError> {
        let (a, b) = self.pair(i, j)?;
        a.connect_peer(b.peer_info()).await
    }

    /// Connect nodes into a line 0-1-2-...-(n-1).
    pub async fn connect_chain(&self) -> Result<(), NodeError> {
        for i in 0..self.nodes.len().saturating_sub(1) {
            self.connect_pair(i, i + 1).await?;
        }
        Ok(())
    }

    /// Tear down the link between `i` and `j` on both sides.
    pub async fn disconnect_pair(&self, i: usize, j: usize) -> Result<(), NodeError> {
        let (a, b) = self.pair(i, j)?;
        a.disconnect_peer(&b.node_id()).await?;
        b.disconnect_peer(&a.node_id()).await?;
        Ok(())
    }

    /// Re-establish the link between `i` and `j`.
    pub async fn reconnect_pair(&self, i: usize, j: usize) -> Result<(), NodeError> {
        self.connect_pair(i, j).await
    }

    /// State snapshots of every node.
    pub fn all_node_info(&self) -> Vec<NodeState> {
        self.nodes.iter().map(|n| n.full_state()).collect()
    }

    /// Stop every node.
    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.stop().await;
        }
    }

    fn pair(&self, i: usize, j: usize) -> Result<(&Arc<Node>, &Arc<Node>), NodeError> {
        if i == j {
            return Err(NodeError::InvalidInput("identical indices".into()));
        }
        let a = self
            .nodes
            .get(i)
            .ok_or_else(|| NodeError::InvalidInput(format!("no node {i}")))?;
        let b = self
            .nodes
            .get(j)
            .ok_or_else(|| NodeError::InvalidInput(format!("no node {j}")))?;
        Ok((a, b))
    }
}
