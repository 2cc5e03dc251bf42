// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

//! Veil layer: Noise XX encrypted sessions over bifrost connections.
//!
//! Every connection is secured before any routed traffic flows. The Noise
//! static key is per-session; the durable Ed25519 identity is bound to the
//! tunnel by a signature over the handshake hash exchanged as the first
//! encrypted payload.

#![forbid(unsafe_code)]

pub mod handshake;
pub mod manager;
pub mod session;

use crate::bifrost::BridgeError;
use thiserror::Error;

/// Veil-layer errors.
#[derive(Debug, Error)]
pub enum VeilError {
    /// Underlying transport failure.
    #[error("transport: {0}")]
    Transport(#[from] BridgeError),
    /// Noise protocol failure (bad key, nonce mismatch, AEAD failure).
    #[error("crypto")]
    Crypto,
    /// Peer identity proof failed verification.
    #[error("peer authentication failed")]
    Auth,
    /// Handshake or keepalive deadline missed.
    #[error("timed out")]
    Timeout,
    /// Payload failed to decode.
    #[error("codec")]
    Codec,
    /// Session is closed.
    #[error("session closed")]
    Closed,
    /// No address known for the target.
    #[error("no address for peer")]
    NoAddress,
    /// Stream sequencing violated (reordering within a session).
    #[error("stream out of order")]
    OutOfOrder,
}
