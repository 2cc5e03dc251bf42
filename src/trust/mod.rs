// Copyright (c) 2026 Valhalla
// Licensed under the Apache License, Version 2.0

//! Trust layer: attestations, capability tokens, transitive trust scoring.

#![forbid(unsafe_code)]

pub mod attestation;
pub mod capability;
pub mod score;

pub use attestation::{Attestation, AttestationError, AttestationStore};
pub use capability::{verify_chain, Capability, CapabilityError, Holder, BEARER};
pub use score::{compute_trust, compute_trust_with_decay, DEFAULT_HOP_DECAY};
