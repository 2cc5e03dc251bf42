// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

//! TCP transport: bifrost frames over a plain stream socket.

#![forbid(unsafe_code)]

use super::frame::{Frame, FrameDecoder};
use super::BridgeError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

const READ_CHUNK: usize = 16 * 1024;

/// Read half: buffers partial reads until whole frames are available.
pub struct TcpFrameReader {
    half: OwnedReadHalf,
    decoder: FrameDecoder,
}

impl TcpFrameReader {
    /// Wrap a read half with the given frame length bound.
    pub fn new(half: OwnedReadHalf, max_frame_len: usize) -> Self {
        Self {
            half,
            decoder: FrameDecoder::new(max_frame_len),
        }
    }

    /// Read the next frame. EOF mid-frame is a transport error; EOF on a
    /// frame boundary is a clean close.
    pub async fn receive(&mut self) -> Result<Frame, BridgeError> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(frame);
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self
                .half
                .read(&mut chunk)
                .await
                .map_err(|_| BridgeError::Io)?;
            if n == 0 {
                return Err(if self.decoder.buffered() == 0 {
                    BridgeError::Closed
                } else {
                    BridgeError::Io
                });
            }
            self.decoder.extend(&chunk[..n]);
        }
    }
}

/// Write half.
pub struct TcpFrameWriter {
    half: OwnedWriteHalf,
}

impl TcpFrameWriter {
    /// Wrap a write half.
    pub fn new(half: OwnedWriteHalf) -> Self {
        Self { half }
    }

    /// Write one frame. A failed write leaves the stream unusable.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), BridgeError> {
        let bytes = frame.encode();
        self.half
            .write_all(&bytes)
            .await
            .map_err(|_| BridgeError::Io)?;
        self.half.flush().await.map_err(|_| BridgeError::Io)
    }

    /// Shut down the write direction.
    pub async fn close(&mut self) -> Result<(), BridgeError> {
        self.half.shutdown().await.map_err(|_| BridgeError::Io)
    }
}
