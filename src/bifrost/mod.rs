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

//! Bifrost: length-prefixed framing over interchangeable stream transports.
//!
//! One `send` produces exactly one `receive` on the peer, on every
//! transport. The transport set is a closed set of tagged variants (TCP,
//! WebSocket); addresses are self-describing `PathAddr` strings that only
//! this layer ever parses.

pub mod frame;
pub mod tcp;
pub mod ws;

pub use frame::{Frame, FrameDecoder, FrameError, FrameType, DEFAULT_MAX_FRAME_LEN, MAGIC};

use crate::types::PathAddr;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::MaybeTlsStream;

/// Transport-layer errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Socket read/write failure.
    #[error("io")]
    Io,
    /// Peer closed the connection cleanly.
    #[error("connection closed")]
    Closed,
    /// Wire protocol violation.
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    /// Address is malformed or names an unknown transport.
    #[error("bad address {0}")]
    BadAddr(String),
    /// Dial did not complete within the bound.
    #[error("dial timeout")]
    DialTimeout,
}

/// Transport selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    /// Plain TCP stream.
    Tcp,
    /// WebSocket binary messages.
    Ws,
}

impl Transport {
    /// Resolve the transport named by an address.
    pub fn for_addr(addr: &PathAddr) -> Result<Self, BridgeError> {
        match addr.scheme() {
            Some("tcp") => Ok(Self::Tcp),
            Some("ws") => Ok(Self::Ws),
            _ => Err(BridgeError::BadAddr(addr.0.clone())),
        }
    }
}

/// Read half of an established connection.
pub enum ConnReader {
    /// TCP framing.
    Tcp(tcp::TcpFrameReader),
    /// WebSocket framing.
    Ws(ws::WsFrameReader),
}

impl ConnReader {
    /// Receive the next frame.
    pub async fn receive(&mut self) -> Result<Frame, BridgeError> {
        match self {
            Self::Tcp(r) => r.receive().await,
            Self::Ws(r) => r.receive().await,
        }
    }
}

/// Write half of an established connection.
pub enum ConnWriter {
    /// TCP framing.
    Tcp(tcp::TcpFrameWriter),
    /// WebSocket framing.
    Ws(ws::WsFrameWriter),
}

impl ConnWriter {
    /// Send one frame.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), BridgeError> {
        match self {
            Self::Tcp(w) => w.send(frame).await,
            Self::Ws(w) => w.send(frame).await,
        }
    }

    /// Close the write direction.
    pub async fn close(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Tcp(w) => w.close().await,
            Self::Ws(w) => w.close().await,
        }
    }
}

/// Bound listener.
pub enum Listener {
    /// TCP acceptor.
    Tcp {
        /// Underlying listener.
        listener: TcpListener,
        /// Frame length bound for accepted connections.
        max_frame_len: usize,
    },
    /// WebSocket acceptor (TCP + upgrade).
    Ws {
        /// Underlying listener.
        listener: TcpListener,
        /// Frame length bound for accepted connections.
        max_frame_len: usize,
    },
}

impl Listener {
    /// Locally bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr, BridgeError> {
        match self {
            Self::Tcp { listener, .. } | Self::Ws { listener, .. } => {
                listener.local_addr().map_err(|_| BridgeError::Io)
            }
        }
    }

    /// Accept one connection and split it into framed halves.
    pub async fn accept(&self) -> Result<(ConnReader, ConnWriter, SocketAddr), BridgeError> {
        match self {
            Self::Tcp {
                listener,
                max_frame_len,
            } => {
                let (stream, remote) = listener.accept().await.map_err(|_| BridgeError::Io)?;
                let _ = stream.set_nodelay(true);
                let (rd, wr) = stream.into_split();
                Ok((
                    ConnReader::Tcp(tcp::TcpFrameReader::new(rd, *max_frame_len)),
                    ConnWriter::Tcp(tcp::TcpFrameWriter::new(wr)),
                    remote,
                ))
            }
            Self::Ws {
                listener,
                max_frame_len,
            } => {
                let (stream, remote) = listener.accept().await.map_err(|_| BridgeError::Io)?;
                let _ = stream.set_nodelay(true);
                let ws = tokio_tungstenite::accept_async(MaybeTlsStream::Plain(stream))
                    .await
                    .map_err(|_| BridgeError::Io)?;
                let (sink, source) = futures::StreamExt::split(ws);
                Ok((
                    ConnReader::Ws(ws::WsFrameReader::new(source, *max_frame_len)),
                    ConnWriter::Ws(ws::WsFrameWriter::new(sink)),
                    remote,
                ))
            }
        }
    }
}

/// Bind a listener on `addr`.
pub async fn listen(addr: &PathAddr, max_frame_len: usize) -> Result<Listener, BridgeError> {
    let host_port = addr
        .host_port()
        .ok_or_else(|| BridgeError::BadAddr(addr.0.clone()))?;
    let listener = TcpListener::bind(host_port)
        .await
        .map_err(|_| BridgeError::Io)?;
    match Transport::for_addr(addr)? {
        Transport::Tcp => Ok(Listener::Tcp {
            listener,
            max_frame_len,
        }),
        Transport::Ws => Ok(Listener::Ws {
            listener,
            max_frame_len,
        }),
    }
}

/// Dial `addr` with a bounded timeout and split into framed halves.
pub async fn dial(
    addr: &PathAddr,
    timeout: Duration,
    max_frame_len: usize,
) -> Result<(ConnReader, ConnWriter), BridgeError> {
    tokio::time::timeout(timeout, dial_inner(addr, max_frame_len))
        .await
        .map_err(|_| BridgeError::DialTimeout)?
}

async fn dial_inner(
    addr: &PathAddr,
    max_frame_len: usize,
) -> Result<(ConnReader, ConnWriter), BridgeError> {
    let host_port = addr
        .host_port()
        .ok_or_else(|| BridgeError::BadAddr(addr.0.clone()))?;
    match Transport::for_addr(addr)? {
        Transport::Tcp => {
            let stream = TcpStream::connect(host_port)
                .await
                .map_err(|_| BridgeError::Io)?;
            let _ = stream.set_nodelay(true);
            let (rd, wr) = stream.into_split();
            Ok((
                ConnReader::Tcp(tcp::TcpFrameReader::new(rd, max_frame_len)),
                ConnWriter::Tcp(tcp::TcpFrameWriter::new(wr)),
            ))
        }
        Transport::Ws => {
            let url = format!("ws://{host_port}");
            let (ws, _) = tokio_tungstenite::connect_async(url)
                .await
                .map_err(|_| BridgeError::Io)?;
            let (sink, source) = futures::StreamExt::split(ws);
            Ok((
                ConnReader::Ws(ws::WsFrameReader::new(source, max_frame_len)),
                ConnWriter::Ws(ws::WsFrameWriter::new(sink)),
            ))
        }
    }
}
