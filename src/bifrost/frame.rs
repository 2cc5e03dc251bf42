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

//! Bifrost frame codec.
//!
//! Wire layout, bit-exact:
//!
//! ```text
//! bytes 0..2   magic 0x56 0x48
//! bytes 2..6   u32 big-endian length of (type byte + payload)
//! byte  6      frame type
//! bytes 7..    payload
//! ```
//!
//! The length field is bounded; oversized frames, bad magic, or an unknown
//! type byte fail-close the connection.

use thiserror::Error;

/// Frame magic bytes.
pub const MAGIC: [u8; 2] = [0x56, 0x48];

/// Default bound on the length field (type byte + payload), 4 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Fixed header size: magic + length.
const HEADER_LEN: usize = 6;

/// Frame type byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Application payload.
    Data = 0,
    /// Stack-internal control payload (handshakes).
    Control = 1,
    /// Liveness probe, empty payload.
    Keepalive = 2,
    /// Orderly shutdown notice.
    Close = 3,
}

impl FrameType {
    /// Decode a type byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Data),
            1 => Some(Self::Control),
            2 => Some(Self::Keepalive),
            3 => Some(Self::Close),
            _ => None,
        }
    }
}

/// A single framed unit on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub frame_type: FrameType,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Construct a frame.
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// Construct a DATA frame.
    pub fn data(payload: Vec<u8>) -> Self {
        Self::new(FrameType::Data, payload)
    }

    /// Construct a CONTROL frame.
    pub fn control(payload: Vec<u8>) -> Self {
        Self::new(FrameType::Control, payload)
    }

    /// Construct an empty KEEPALIVE frame.
    pub fn keepalive() -> Self {
        Self::new(FrameType::Keepalive, Vec::new())
    }

    /// Construct an empty CLOSE frame.
    pub fn close() -> Self {
        Self::new(FrameType::Close, Vec::new())
    }

    /// Encode to the wire form.
    pub fn encode(&self) -> Vec<u8> {
        let len = (self.payload.len() + 1) as u32;
        let mut out = Vec::with_capacity(HEADER_LEN + 1 + self.payload.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&len.to_be_bytes());
        out.push(self.frame_type as u8);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Frame decode failures. All of them fail-close the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Magic bytes did not match.
    #[error("bad magic")]
    BadMagic,
    /// Length field exceeds the configured bound.
    #[error("frame too large: {len} > {max}")]
    TooLarge {
        /// Declared length.
        len: usize,
        /// Configured bound.
        max: usize,
    },
    /// Length field does not cover the type byte.
    #[error("bad length")]
    BadLength,
    /// Unknown frame type byte.
    #[error("bad frame type {0}")]
    BadType(u8),
    /// Input ended inside a frame (only from one-shot decoding).
    #[error("truncated frame")]
    Truncated,
}

/// Incremental decoder buffering partial reads until a full frame is available.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_len: usize,
}

impl FrameDecoder {
    /// Create a decoder with the given length bound.
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
        }
    }

    /// Append raw bytes read from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if any.
    ///
    /// Errors are not recoverable; the caller must close the connection.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        if self.buf[0..2] != MAGIC {
            return Err(FrameError::BadMagic);
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&self.buf[2..6]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len == 0 {
            return Err(FrameError::BadLength);
        }
        if len > self.max_len {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_len,
            });
        }
        let total = HEADER_LEN + len;
        if self.buf.len() < total {
            return Ok(None);
        }
        let type_byte = self.buf[HEADER_LEN];
        let frame_type = FrameType::from_byte(type_byte).ok_or(FrameError::BadType(type_byte))?;
        let payload = self.buf[HEADER_LEN + 1..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(Frame {
            frame_type,
            payload,
        }))
    }
}

/// Decode exactly one frame from a self-contained message (WebSocket binary).
///
/// Trailing bytes after the frame are a protocol violation.
pub fn decode_one(bytes: &[u8], max_len: usize) -> Result<Frame, FrameError> {
    let mut dec = FrameDecoder::new(max_len);
    dec.extend(bytes);
    match dec.next_frame()? {
        Some(frame) if dec.buffered() == 0 => Ok(frame),
        Some(_) => Err(FrameError::BadLength),
        None => Err(FrameError::Truncated),
    }
}
