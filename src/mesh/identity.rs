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

//! Node identity: Ed25519 keypair with `NodeId = SHA-256(public key)`.
//!
//! Persistence is a JSON file (`private_key`, `public_key`, `node_id`, hex
//! fields) with owner-only permissions, written atomically. On load the id
//! is recomputed from the public key; a mismatch is a fatal integrity error.

use crate::types::NodeId;
use ring::{
    rand::SystemRandom,
    signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519},
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;
use zeroize::Zeroizing;

/// Identity errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("io")]
    Io,
    #[error("invalid key encoding")]
    InvalidKey,
    #[error("identity file corrupted: node id does not match public key")]
    IntegrityMismatch,
    #[error("crypto")]
    Crypto,
}

#[derive(Serialize, Deserialize)]
struct IdentityFile {
    private_key: String,
    public_key: String,
    node_id: String,
}

/// An Ed25519 signing identity and its derived node id.
pub struct Identity {
    keypair: Ed25519KeyPair,
    pkcs8: Zeroizing<Vec<u8>>,
    public_key: [u8; 32],
    node_id: NodeId,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl Identity {
    /// Generate a fresh identity.
    pub fn generate() -> Result<Self, IdentityError> {
        let rng = SystemRandom::new();
        let pkcs8 =
            Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| IdentityError::Crypto)?;
        Self::from_pkcs8(Zeroizing::new(pkcs8.as_ref().to_vec()))
    }

    fn from_pkcs8(pkcs8: Zeroizing<Vec<u8>>) -> Result<Self, IdentityError> {
        let keypair =
            Ed25519KeyPair::from_pkcs8(&pkcs8).map_err(|_| IdentityError::InvalidKey)?;
        let pk = keypair.public_key().as_ref();
        if pk.len() != 32 {
            return Err(IdentityError::InvalidKey);
        }
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(pk);
        let node_id = NodeId::from_public_key(&public_key);
        Ok(Self {
            keypair,
            pkcs8,
            public_key,
            node_id,
        })
    }

    /// Node id derived from the public key.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Short display form of the node id.
    pub fn short_id(&self) -> String {
        self.node_id.short()
    }

    /// Ed25519 public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.public_key
    }

    /// Sign a message, producing a 64-byte Ed25519 signature.
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        let sig = self.keypair.sign(msg);
        let mut out = [0u8; 64];
        out.copy_from_slice(sig.as_ref());
        out
    }

    /// Load an identity from `path`, or create and persist one.
    pub fn load_or_create(path: &Path) -> Result<Self, IdentityError> {
        if path.exists() {
            return Self::load(path);
        }
        let identity = Self::generate()?;
        identity.save(path)?;
        Ok(identity)
    }

    /// Load and integrity-check a persisted identity.
    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        let raw = fs::read(path).map_err(|_| IdentityError::Io)?;
        let file: IdentityFile =
            serde_json::from_slice(&raw).map_err(|_| IdentityError::InvalidKey)?;
        let pkcs8 = Zeroizing::new(
            hex::decode(file.private_key.trim()).map_err(|_| IdentityError::InvalidKey)?,
        );
        let identity = Self::from_pkcs8(pkcs8)?;

        let stored_pk =
            hex::decode(file.public_key.trim()).map_err(|_| IdentityError::InvalidKey)?;
        if stored_pk != identity.public_key {
            return Err(IdentityError::IntegrityMismatch);
        }
        let stored_id =
            hex::decode(file.node_id.trim()).map_err(|_| IdentityError::InvalidKey)?;
        if stored_id != identity.node_id.as_bytes() {
            return Err(IdentityError::IntegrityMismatch);
        }
        Ok(identity)
    }

    /// Persist to `path` with owner-only permissions (atomic write).
    pub fn save(&self, path: &Path) -> Result<(), IdentityError> {
        let file = IdentityFile {
            private_key: hex::encode(self.pkcs8.as_slice()),
            public_key: hex::encode(self.public_key),
            node_id: hex::encode(self.node_id.as_bytes()),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|_| IdentityError::Io)?;
        atomic_write_private(path, &bytes)
    }
}

/// Verify an Ed25519 signature given raw public key bytes.
pub fn verify(pk: &[u8; 32], msg: &[u8], sig: &[u8]) -> bool {
    if sig.len() != 64 {
        return false;
    }
    UnparsedPublicKey::new(&ED25519, pk).verify(msg, sig).is_ok()
}

fn set_private_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

/// Atomic write to disk (best-effort fsync, then rename).
fn atomic_write_private(path: &Path, bytes: &[u8]) -> Result<(), IdentityError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| IdentityError::Io)?;
    }

    let mut tmp: PathBuf = path.to_path_buf();
    tmp.set_extension("tmp");

    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .map_err(|_| IdentityError::Io)?;
        f.write_all(bytes).map_err(|_| IdentityError::Io)?;
        let _ = f.sync_all();
    }

    set_private_perms_best_effort(&tmp);
    fs::rename(&tmp, path).map_err(|_| IdentityError::Io)?;
    set_private_perms_best_effort(path);
    Ok(())
}
