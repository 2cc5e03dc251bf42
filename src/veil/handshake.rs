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

//! Noise XX handshake with Ed25519 identity binding.
//!
//! Three Noise messages travel in CONTROL frames. After transport mode,
//! each side sends an identity proof inside the tunnel: its Ed25519 public
//! key and a signature over `"valhalla-identity-v1" || handshake hash`.
//! The proof binds the per-session Noise static key to the durable node
//! identity; the node id is recomputed as SHA-256 of the proven key.

use crate::bifrost::{ConnReader, ConnWriter, Frame, FrameType};
use crate::mesh::identity::{self, Identity};
use crate::types::{decode_canonical_limited, encode_canonical, NodeId};
use crate::veil::VeilError;
use serde::{Deserialize, Serialize};

/// Noise pattern and cipher suite.
pub const NOISE_PARAMS: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2s";

/// Domain prefix for the identity proof signature.
const IDENTITY_DOMAIN: &[u8] = b"valhalla-identity-v1";

/// Noise messages are bounded at 64 KiB.
const NOISE_BUF: usize = 65535;

/// Size cap for decoded identity proofs.
const MAX_PROOF_LEN: usize = 4096;

#[derive(Serialize, Deserialize)]
struct IdentityProof {
    public_key: [u8; 32],
    signature: Vec<u8>,
}

/// Completed handshake: transport state plus the authenticated peer.
pub struct HandshakeOutcome {
    /// Noise transport state (AEAD cipher pair).
    pub transport: snow::TransportState,
    /// Authenticated peer id.
    pub peer_id: NodeId,
    /// Peer's proven Ed25519 public key.
    pub peer_public_key: [u8; 32],
}

fn proof_signing_bytes(handshake_hash: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(IDENTITY_DOMAIN.len() + handshake_hash.len());
    out.extend_from_slice(IDENTITY_DOMAIN);
    out.extend_from_slice(handshake_hash);
    out
}

async fn send_control(writer: &mut ConnWriter, payload: &[u8]) -> Result<(), VeilError> {
    writer.send(&Frame::control(payload.to_vec())).await?;
    Ok(())
}

async fn recv_control(reader: &mut ConnReader) -> Result<Vec<u8>, VeilError> {
    loop {
        let frame = reader.receive().await?;
        match frame.frame_type {
            FrameType::Control => return Ok(frame.payload),
            FrameType::Keepalive => continue,
            _ => return Err(VeilError::Crypto),
        }
    }
}

fn build_state(initiator: bool) -> Result<snow::HandshakeState, VeilError> {
    let params = NOISE_PARAMS.parse().map_err(|_| VeilError::Crypto)?;
    let builder = snow::Builder::new(params);
    let static_key = builder.generate_keypair().map_err(|_| VeilError::Crypto)?;
    let builder = snow::Builder::new(NOISE_PARAMS.parse().map_err(|_| VeilError::Crypto)?)
        .local_private_key(&static_key.private);
    if initiator {
        builder.build_initiator().map_err(|_| VeilError::Crypto)
    } else {
        builder.build_responder().map_err(|_| VeilError::Crypto)
    }
}

fn seal_proof(
    transport: &mut snow::TransportState,
    identity: &Identity,
    handshake_hash: &[u8],
) -> Result<Vec<u8>, VeilError> {
    let proof = IdentityProof {
        public_key: identity.public_key(),
        signature: identity.sign(&proof_signing_bytes(handshake_hash)).to_vec(),
    };
    let plain = encode_canonical(&proof).map_err(|_| VeilError::Codec)?;
    let mut sealed = vec![0u8; plain.len() + 16];
    let n = transport
        .write_message(&plain, &mut sealed)
        .map_err(|_| VeilError::Crypto)?;
    sealed.truncate(n);
    Ok(sealed)
}

fn open_proof(
    transport: &mut snow::TransportState,
    sealed: &[u8],
    handshake_hash: &[u8],
    expected: Option<NodeId>,
) -> Result<(NodeId, [u8; 32]), VeilError> {
    let mut plain = vec![0u8; sealed.len()];
    let n = transport
        .read_message(sealed, &mut plain)
        .map_err(|_| VeilError::Crypto)?;
    let proof: IdentityProof =
        decode_canonical_limited(&plain[..n], MAX_PROOF_LEN).map_err(|_| VeilError::Codec)?;
    if !identity::verify(
        &proof.public_key,
        &proof_signing_bytes(handshake_hash),
        &proof.signature,
    ) {
        return Err(VeilError::Auth);
    }
    let peer_id = NodeId::from_public_key(&proof.public_key);
    if let Some(expected) = expected {
        if peer_id != expected {
            return Err(VeilError::Auth);
        }
    }
    Ok((peer_id, proof.public_key))
}

/// Run the handshake as the dialing side. `expected` pins the peer id when
/// dialing a known node.
pub async fn initiate(
    reader: &mut ConnReader,
    writer: &mut ConnWriter,
    identity: &Identity,
    expected: Option<NodeId>,
) -> Result<HandshakeOutcome, VeilError> {
    let mut state = build_state(true)?;
    let mut buf = vec![0u8; NOISE_BUF];

    // -> e
    let n = state
        .write_message(&[], &mut buf)
        .map_err(|_| VeilError::Crypto)?;
    send_control(writer, &buf[..n]).await?;

    // <- e, ee, s, es
    let msg2 = recv_control(reader).await?;
    state
        .read_message(&msg2, &mut buf)
        .map_err(|_| VeilError::Crypto)?;

    // -> s, se
    let n = state
        .write_message(&[], &mut buf)
        .map_err(|_| VeilError::Crypto)?;
    send_control(writer, &buf[..n]).await?;

    let handshake_hash = state.get_handshake_hash().to_vec();
    let mut transport = state.into_transport_mode().map_err(|_| VeilError::Crypto)?;

    // Identity proofs: initiator first.
    let sealed = seal_proof(&mut transport, identity, &handshake_hash)?;
    send_control(writer, &sealed).await?;

    let peer_sealed = recv_control(reader).await?;
    let (peer_id, peer_public_key) =
        open_proof(&mut transport, &peer_sealed, &handshake_hash, expected)?;

    Ok(HandshakeOutcome {
        transport,
        peer_id,
        peer_public_key,
    })
}

/// Run the handshake as the accepting side.
pub async fn respond(
    reader: &mut ConnReader,
    writer: &mut ConnWriter,
    identity: &Identity,
) -> Result<HandshakeOutcome, VeilError> {
    let mut state = build_state(false)?;
    let mut buf = vec![0u8; NOISE_BUF];

    // -> e
    let msg1 = recv_control(reader).await?;
    state
        .read_message(&msg1, &mut buf)
        .map_err(|_| VeilError::Crypto)?;

    // <- e, ee, s, es
    let n = state
        .write_message(&[], &mut buf)
        .map_err(|_| VeilError::Crypto)?;
    send_control(writer, &buf[..n]).await?;

    // -> s, se
    let msg3 = recv_control(reader).await?;
    state
        .read_message(&msg3, &mut buf)
        .map_err(|_| VeilError::Crypto)?;

    let handshake_hash = state.get_handshake_hash().to_vec();
    let mut transport = state.into_transport_mode().map_err(|_| VeilError::Crypto)?;

    let peer_sealed = recv_control(reader).await?;
    let (peer_id, peer_public_key) =
        open_proof(&mut transport, &peer_sealed, &handshake_hash, None)?;

    let sealed = seal_proof(&mut transport, identity, &handshake_hash)?;
    send_control(writer, &sealed).await?;

    Ok(HandshakeOutcome {
        transport,
        peer_id,
        peer_public_key,
    })
}
