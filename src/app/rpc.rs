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

//! Request/response RPC over routed messages.
//!
//! A handler takes `(method, args, caller)` and returns response bytes or
//! an error string. Dispatch converts unknown services, handler errors,
//! and handler panics into error responses; a panic never crosses the
//! receive loop.

use crate::types::{decode_canonical_limited, encode_canonical, CodecError, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Size cap for decoded RPC payloads.
pub const MAX_RPC_PAYLOAD: usize = 8 * 1024 * 1024;

/// RPC request envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id.
    pub id: u64,
    /// Target service.
    pub service: String,
    /// Method within the service.
    pub method: String,
    /// Argument bytes.
    pub args: Vec<u8>,
    /// Calling node.
    pub from: NodeId,
}

/// RPC response envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Correlation id (mirrors the request).
    pub id: u64,
    /// Response bytes (empty on error).
    pub data: Vec<u8>,
    /// Error text when the call failed.
    pub error: Option<String>,
}

impl RpcRequest {
    /// Stable byte encoding.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_canonical(self)
    }

    /// Decode with a size cap.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_canonical_limited(bytes, MAX_RPC_PAYLOAD)
    }
}

impl RpcResponse {
    /// Stable byte encoding.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_canonical(self)
    }

    /// Decode with a size cap.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_canonical_limited(bytes, MAX_RPC_PAYLOAD)
    }

    fn error_for(id: u64, error: String) -> Self {
        Self {
            id,
            data: Vec::new(),
            error: Some(error),
        }
    }
}

/// Service handler: `(method, args, caller) -> bytes | error`.
pub type RpcHandler = Arc<dyn Fn(&str, &[u8], &NodeId) -> Result<Vec<u8>, String> + Send + Sync>;

/// Service-name dispatch table.
pub struct RpcRouter {
    services: RwLock<HashMap<String, RpcHandler>>,
}

impl Default for RpcRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Register a service handler, replacing any existing one.
    pub fn register_service(&self, service: &str, handler: RpcHandler) {
        self.services
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(service.to_string(), handler);
    }

    /// Remove a service. Returns whether it existed.
    pub fn unregister_service(&self, service: &str) -> bool {
        self.services
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(service)
            .is_some()
    }

    /// Whether a service is registered.
    pub fn has_service(&self, service: &str) -> bool {
        self.services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(service)
    }

    /// Registered service names, sorted.
    pub fn list_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Dispatch a request. Always yields a response; failures land in the
    /// error field.
    pub fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        let handler = {
            let services = self.services.read().unwrap_or_else(|e| e.into_inner());
            services.get(&request.service).cloned()
        };
        let Some(handler) = handler else {
            return RpcResponse::error_for(
                request.id,
                format!("unknown service: {}", request.service),
            );
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            handler(&request.method, &request.args, &request.from)
        }));
        match outcome {
            Ok(Ok(data)) => RpcResponse {
                id: request.id,
                data,
                error: None,
            },
            Ok(Err(error)) => RpcResponse::error_for(request.id, error),
            Err(_) => {
                warn!(service = %request.service, method = %request.method, "handler panicked");
                RpcResponse::error_for(request.id, "handler panicked".to_string())
            }
        }
    }
}
