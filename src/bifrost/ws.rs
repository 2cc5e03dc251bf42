// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

//! WebSocket transport: one bifrost frame per binary message.

#![forbid(unsafe_code)]

use super::frame::{self, Frame};
use super::BridgeError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Unified stream type for dialed and accepted sockets.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Read half of a WebSocket connection.
pub struct WsFrameReader {
    stream: SplitStream<WsStream>,
    max_frame_len: usize,
}

impl WsFrameReader {
    /// Wrap a split read half.
    pub fn new(stream: SplitStream<WsStream>, max_frame_len: usize) -> Self {
        Self {
            stream,
            max_frame_len,
        }
    }

    /// Read the next frame. Non-binary messages are skipped; a close frame
    /// or stream end is a clean close.
    pub async fn receive(&mut self) -> Result<Frame, BridgeError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(frame::decode_one(&bytes, self.max_frame_len)?);
                }
                Some(Ok(Message::Close(_))) | None => return Err(BridgeError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(_)) => return Err(BridgeError::Io),
            }
        }
    }
}

/// Write half of a WebSocket connection.
pub struct WsFrameWriter {
    sink: SplitSink<WsStream, Message>,
}

impl WsFrameWriter {
    /// Wrap a split write half.
    pub fn new(sink: SplitSink<WsStream, Message>) -> Self {
        Self { sink }
    }

    /// Send one frame as a binary message.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), BridgeError> {
        self.sink
            .send(Message::Binary(frame.encode()))
            .await
            .map_err(|_| BridgeError::Io)
    }

    /// Send a WebSocket close and drop the sink.
    pub async fn close(&mut self) -> Result<(), BridgeError> {
        self.sink.close().await.map_err(|_| BridgeError::Io)
    }
}
