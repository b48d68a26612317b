//! Per-replica node identity.
//!
//! Every open store signs its transport messages with a node key. The key is
//! derived from a machine secret and per-file material, so recreating a store
//! file (or gaining the write key) yields a new identity that peers treat as
//! a fresh source of records.

use crate::error::{CryptoError, CryptoResult};
use crate::hash::{keyed_hash, HASH_LEN};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use zeroize::Zeroizing;

/// Public identity of a node: its 32-byte Ed25519 verifying key.
///
/// The text form is standard base64 and is what the store records in
/// `receivedFrom` and the peers table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Reads an id from a slice of exactly 32 bytes.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(slice).ok().map(Self)
    }

    /// Decodes the base64 text form.
    pub fn from_base64(text: &str) -> CryptoResult<Self> {
        let raw = STANDARD.decode(text.trim())?;
        Self::from_slice(&raw).ok_or_else(|| CryptoError::invalid_length("node id", 32, raw.len()))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Verifies a signature made by this node.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> CryptoResult<()> {
        let key = VerifyingKey::from_bytes(&self.0)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        key.verify(message, &Signature::from_bytes(signature))
            .map_err(|_| CryptoError::BadSignature)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD.encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

/// Signing half of a node identity.
#[derive(Clone)]
pub struct NodeIdentity {
    key: SigningKey,
}

impl NodeIdentity {
    /// Derives an identity as `keyed_hash(machine_secret, material)`.
    #[must_use]
    pub fn derive(machine_secret: &[u8; HASH_LEN], material: &[u8]) -> Self {
        let seed = Zeroizing::new(keyed_hash(machine_secret, material));
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Creates a random identity for stores that are never reopened.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Returns the public node id.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        NodeId(self.key.verifying_key().to_bytes())
    }

    /// Signs `message`.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.key.sign(message).to_bytes()
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("node_id", &self.node_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = NodeIdentity::derive(&[1; 32], b"store.db|seed|key");
        let b = NodeIdentity::derive(&[1; 32], b"store.db|seed|key");
        let c = NodeIdentity::derive(&[2; 32], b"store.db|seed|key");
        let d = NodeIdentity::derive(&[1; 32], b"other.db|seed|key");
        assert_eq!(a.node_id(), b.node_id());
        assert_ne!(a.node_id(), c.node_id());
        assert_ne!(a.node_id(), d.node_id());
    }

    #[test]
    fn node_signatures_verify() {
        let node = NodeIdentity::ephemeral();
        let sig = node.sign(b"hello");
        assert!(node.node_id().verify(b"hello", &sig).is_ok());
        assert_eq!(
            node.node_id().verify(b"hullo", &sig),
            Err(CryptoError::BadSignature)
        );
    }

    #[test]
    fn text_form_roundtrips() {
        let id = NodeIdentity::ephemeral().node_id();
        assert_eq!(NodeId::from_base64(&id.to_string()).unwrap(), id);
        assert!(NodeId::from_base64("AAAA").is_err());
    }
}
