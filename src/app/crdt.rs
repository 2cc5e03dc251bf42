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

//! Last-writer-wins register store.
//!
//! Conflict order is the pair (timestamp, writer id): greater timestamp
//! wins, ties go to the lexicographically greater writer. Merge is
//! idempotent and commutative; registers are never evicted by size.

use crate::types::{now_ms, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// CRDT_SYNC payload: one register pushed to a peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterSync {
    /// Register key.
    pub key: String,
    /// The register value and version.
    pub register: LwwRegister,
}

/// One versioned register.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LwwRegister {
    /// Register value.
    pub value: Vec<u8>,
    /// Write time, ms since UNIX epoch.
    pub timestamp_ms: u64,
    /// Writing node.
    pub writer: NodeId,
}

impl LwwRegister {
    /// Whether this register wins over `other` under the LWW order.
    pub fn beats(&self, other: &LwwRegister) -> bool {
        (self.timestamp_ms, self.writer.as_bytes()) > (other.timestamp_ms, other.writer.as_bytes())
    }
}

/// Keyed LWW register store.
pub struct LwwStore {
    self_id: NodeId,
    registers: RwLock<BTreeMap<String, LwwRegister>>,
}

impl LwwStore {
    /// Create a store writing as `self_id`.
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            registers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Write a value at the current clock.
    pub fn set(&self, key: &str, value: Vec<u8>) -> LwwRegister {
        let register = LwwRegister {
            value,
            timestamp_ms: now_ms(),
            writer: self.self_id,
        };
        self.apply(key, register.clone());
        register
    }

    /// Apply an explicit register (sync path). Returns whether it won.
    pub fn set_with_timestamp(&self, key: &str, register: LwwRegister) -> bool {
        self.apply(key, register)
    }

    fn apply(&self, key: &str, register: LwwRegister) -> bool {
        let mut registers = self.registers.write().unwrap_or_else(|e| e.into_inner());
        match registers.get(key) {
            Some(existing) if !register.beats(existing) => false,
            _ => {
                registers.insert(key.to_string(), register);
                true
            }
        }
    }

    /// Current value for a key.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.get_register(key).map(|r| r.value)
    }

    /// Current register for a key.
    pub fn get_register(&self, key: &str) -> Option<LwwRegister> {
        let registers = self.registers.read().unwrap_or_else(|e| e.into_inner());
        registers.get(key).cloned()
    }

    /// Remove a key. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        let mut registers = self.registers.write().unwrap_or_else(|e| e.into_inner());
        registers.remove(key).is_some()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let registers = self.registers.read().unwrap_or_else(|e| e.into_inner());
        registers.keys().cloned().collect()
    }

    /// Copy of every register.
    pub fn snapshot(&self) -> BTreeMap<String, LwwRegister> {
        let registers = self.registers.read().unwrap_or_else(|e| e.into_inner());
        registers.clone()
    }

    /// Apply every remote register that wins locally. Returns the count
    /// updated.
    pub fn merge(&self, remote: &BTreeMap<String, LwwRegister>) -> usize {
        let mut updated = 0;
        for (key, register) in remote {
            if self.apply(key, register.clone()) {
                updated += 1;
            }
        }
        updated
    }

    /// Number of registers.
    pub fn len(&self) -> usize {
        let registers = self.registers.read().unwrap_or_else(|e| e.into_inner());
        registers.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
