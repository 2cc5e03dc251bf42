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

//! Encrypted session: multiplexed streams over the Noise transport state.
//!
//! Stream frame layout inside a sealed payload: 4-byte stream id (BE),
//! 8-byte sequence (BE), 1-byte flags, data. Flags reserve FIN/RST/ACK/
//! RELIABLE and three priority bits; the implemented delivery mode is
//! reliable-ordered, the remaining modes keep their wire bits.
//!
//! Noise bounds a single message at 64 KiB, so larger payloads are sealed
//! as length-prefixed chunks inside one bifrost DATA frame. Nonces are
//! sequential per direction; any AEAD or ordering failure closes the
//! session.

use crate::bifrost::{ConnWriter, Frame};
use crate::events::EventBus;
use crate::types::{now_ms, NodeId};
use crate::veil::VeilError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

/// Stream flag: sender finished the stream.
pub const FLAG_FIN: u8 = 0b0000_0001;
/// Stream flag: abrupt reset.
pub const FLAG_RST: u8 = 0b0000_0010;
/// Stream flag: acknowledgement.
pub const FLAG_ACK: u8 = 0b0000_0100;
/// Stream flag: reliable delivery requested.
pub const FLAG_RELIABLE: u8 = 0b0000_1000;
/// Mask for the three priority bits.
pub const PRIORITY_MASK: u8 = 0b1110_0000;

/// Stream frame header size.
const STREAM_HEADER_LEN: usize = 4 + 8 + 1;

/// Default stream carrying routed mesh messages.
pub const MESH_STREAM: u32 = 0;

/// Largest plaintext sealed per Noise message (tag overhead reserved).
const CHUNK_LEN: usize = 60 * 1024;

/// One frame on a numbered stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFrame {
    /// Stream number.
    pub stream_id: u32,
    /// Per-stream sequence.
    pub seq: u64,
    /// Flag bits.
    pub flags: u8,
    /// Payload.
    pub data: Vec<u8>,
}

impl StreamFrame {
    /// Encode to the in-session wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STREAM_HEADER_LEN + self.data.len());
        out.extend_from_slice(&self.stream_id.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.push(self.flags);
        out.extend_from_slice(&self.data);
        out
    }

    /// Decode from the in-session wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, VeilError> {
        if bytes.len() < STREAM_HEADER_LEN {
            return Err(VeilError::Codec);
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&bytes[0..4]);
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&bytes[4..12]);
        Ok(Self {
            stream_id: u32::from_be_bytes(id),
            seq: u64::from_be_bytes(seq),
            flags: bytes[12],
            data: bytes[13..].to_vec(),
        })
    }
}

/// An authenticated, encrypted connection to one peer.
pub struct Session {
    remote: NodeId,
    remote_public_key: [u8; 32],
    // snow's transport state carries both direction ciphers; nonces must
    // advance sequentially, so a single brief lock guards it. Never held
    // across an await.
    transport: Mutex<snow::TransportState>,
    writer: AsyncMutex<ConnWriter>,
    send_seq: Mutex<HashMap<u32, u64>>,
    recv_seq: Mutex<HashMap<u32, u64>>,
    last_rx_ms: AtomicU64,
    closed: AtomicBool,
    events: Arc<EventBus>,
}

impl Session {
    /// Wrap a completed handshake.
    pub fn new(
        remote: NodeId,
        remote_public_key: [u8; 32],
        transport: snow::TransportState,
        writer: ConnWriter,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            remote,
            remote_public_key,
            transport: Mutex::new(transport),
            writer: AsyncMutex::new(writer),
            send_seq: Mutex::new(HashMap::new()),
            recv_seq: Mutex::new(HashMap::new()),
            last_rx_ms: AtomicU64::new(now_ms()),
            closed: AtomicBool::new(false),
            events,
        }
    }

    /// Authenticated peer id.
    pub fn remote(&self) -> NodeId {
        self.remote
    }

    /// Peer's proven Ed25519 public key.
    pub fn remote_public_key(&self) -> [u8; 32] {
        self.remote_public_key
    }

    /// Send a payload on the default mesh stream.
    pub async fn send_data(&self, payload: &[u8]) -> Result<(), VeilError> {
        self.send_stream(MESH_STREAM, FLAG_RELIABLE, payload).await
    }

    /// Send a payload on a numbered stream.
    ///
    /// Sequence allocation, sealing, and the socket write all happen under
    /// the writer lock so that nonce order always matches wire order.
    pub async fn send_stream(
        &self,
        stream_id: u32,
        flags: u8,
        payload: &[u8],
    ) -> Result<(), VeilError> {
        if self.is_closed() {
            return Err(VeilError::Closed);
        }
        let mut writer = self.writer.lock().await;
        let seq = {
            let mut seqs = self.send_seq.lock().unwrap_or_else(|e| e.into_inner());
            let entry = seqs.entry(stream_id).or_insert(0);
            let seq = *entry;
            *entry += 1;
            seq
        };
        let frame = StreamFrame {
            stream_id,
            seq,
            flags,
            data: payload.to_vec(),
        };
        let sealed = self.seal(&frame.encode())?;
        self.events
            .emit_kv("veil", "encrypt", "bytes", payload.len().to_string());

        writer
            .send(&Frame::data(sealed))
            .await
            .map_err(VeilError::Transport)
    }

    /// Open a sealed DATA payload and enforce per-stream ordering.
    pub fn open_data(&self, sealed: &[u8]) -> Result<StreamFrame, VeilError> {
        let plain = self.open(sealed)?;
        let frame = StreamFrame::decode(&plain)?;
        {
            let mut seqs = self.recv_seq.lock().unwrap_or_else(|e| e.into_inner());
            let expected = seqs.entry(frame.stream_id).or_insert(0);
            if frame.seq != *expected {
                return Err(VeilError::OutOfOrder);
            }
            *expected += 1;
        }
        self.touch_rx();
        self.events
            .emit_kv("veil", "decrypt", "bytes", frame.data.len().to_string());
        Ok(frame)
    }

    fn seal(&self, plain: &[u8]) -> Result<Vec<u8>, VeilError> {
        let mut transport = self.transport.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::with_capacity(plain.len() + 64);
        let mut chunks = plain.chunks(CHUNK_LEN).peekable();
        if chunks.peek().is_none() {
            // Zero-length payloads still produce one sealed chunk.
            let mut sealed = vec![0u8; 16];
            let n = transport
                .write_message(&[], &mut sealed)
                .map_err(|_| VeilError::Crypto)?;
            out.extend_from_slice(&(n as u32).to_be_bytes());
            out.extend_from_slice(&sealed[..n]);
            return Ok(out);
        }
        for chunk in chunks {
            let mut sealed = vec![0u8; chunk.len() + 16];
            let n = transport
                .write_message(chunk, &mut sealed)
                .map_err(|_| VeilError::Crypto)?;
            out.extend_from_slice(&(n as u32).to_be_bytes());
            out.extend_from_slice(&sealed[..n]);
        }
        Ok(out)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, VeilError> {
        let mut transport = self.transport.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::with_capacity(sealed.len());
        let mut rest = sealed;
        while !rest.is_empty() {
            if rest.len() < 4 {
                return Err(VeilError::Codec);
            }
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&rest[..4]);
            let len = u32::from_be_bytes(len_bytes) as usize;
            rest = &rest[4..];
            if len == 0 || len > rest.len() {
                return Err(VeilError::Codec);
            }
            let mut plain = vec![0u8; len];
            let n = transport
                .read_message(&rest[..len], &mut plain)
                .map_err(|_| VeilError::Crypto)?;
            out.extend_from_slice(&plain[..n]);
            rest = &rest[len..];
        }
        Ok(out)
    }

    /// Record inbound activity (any frame type).
    pub fn touch_rx(&self) {
        self.last_rx_ms.store(now_ms(), Ordering::Relaxed);
    }

    /// Last inbound activity, ms since UNIX epoch.
    pub fn last_rx_ms(&self) -> u64 {
        self.last_rx_ms.load(Ordering::Relaxed)
    }

    /// Send a keepalive probe.
    pub async fn send_keepalive(&self) -> Result<(), VeilError> {
        if self.is_closed() {
            return Err(VeilError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer
            .send(&Frame::keepalive())
            .await
            .map_err(VeilError::Transport)
    }

    /// Send a CLOSE frame and mark the session closed.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.send(&Frame::close()).await;
        let _ = writer.close().await;
    }

    /// Mark closed without touching the socket (reader saw EOF/CLOSE).
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
