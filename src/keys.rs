//! Expected host key resolution.
//!
//! This module handles:
//! - The `KeyGetter` collaborator contract for resolving a jump host's
//!   expected public key
//! - Parsing expected keys from OpenSSH text
//! - Computing key fingerprints for logging

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};

/// Resolves the public key a jump host is expected to present.
///
/// The SSH handshake is rejected unless the server's offered key matches the
/// resolved key exactly; unknown hosts are never trusted on first use.
#[async_trait]
pub trait KeyGetter: Send + Sync {
    /// Return the host key expected at `url`, given the private key material
    /// the caller is about to authenticate with.
    async fn get(&self, private_key_pem: &str, url: &str) -> Result<PublicKey>;
}

/// A [`KeyGetter`] that returns a key fixed at construction time.
pub struct StaticKeyGetter {
    key: PublicKey,
}

impl StaticKeyGetter {
    /// Create a getter around an already-parsed public key.
    pub fn new(key: PublicKey) -> Self {
        Self { key }
    }

    /// Parse an expected host key from OpenSSH text
    /// (e.g. `ssh-ed25519 AAAA... comment`).
    pub fn from_openssh(key: &str) -> Result<Self> {
        let key = PublicKey::from_openssh(key.trim())
            .with_context(|| "Invalid OpenSSH public key")?;
        Ok(Self { key })
    }
}

#[async_trait]
impl KeyGetter for StaticKeyGetter {
    async fn get(&self, _private_key_pem: &str, _url: &str) -> Result<PublicKey> {
        Ok(self.key.clone())
    }
}

/// Compute the SHA256 fingerprint of raw key bytes (SSH wire format).
pub fn compute_fingerprint_from_bytes(key_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key_bytes);
    let hash = hasher.finalize();

    // Format as SHA256:base64 (without trailing =), as `ssh-keygen -l` prints it.
    let b64 = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    format!("SHA256:{}", b64)
}

/// Compute the SHA256 fingerprint of a public key.
pub fn compute_fingerprint(key: &PublicKey) -> String {
    compute_fingerprint_from_bytes(&key.public_key_bytes())
}
