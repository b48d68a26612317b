//! Sync and write keys.
//!
//! A store is addressed by its *sync key*, an Ed25519 verifying key shared
//! by every replica. Holders of the matching *write key* may author records.
//! The raw sync key also seeds the symmetric key used for the transport
//! envelope, so it is treated as a secret shared among peers.

use crate::error::{CryptoError, CryptoResult};
use crate::hash::{hash, hash_prefix, HASH_LEN};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use zeroize::Zeroizing;

/// Length of a key fingerprint embedded in record signatures.
pub const FINGERPRINT_LEN: usize = 8;

/// Length of a routing key hint.
pub const KEY_HINT_LEN: usize = 16;

/// Length of a secret box nonce.
pub const NONCE_LEN: usize = 24;

/// Short routing tag derived from a sync key: `hash(hash(sync_key))[..16]`.
///
/// Lets a process hosting several stores route an inbound packet without
/// decrypting it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyHint([u8; KEY_HINT_LEN]);

impl KeyHint {
    /// Wraps raw hint bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_HINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Reads a hint from a slice of exactly 16 bytes.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        <[u8; KEY_HINT_LEN]>::try_from(slice).ok().map(Self)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_HINT_LEN] {
        &self.0
    }
}

impl fmt::Debug for KeyHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyHint({self})")
    }
}

impl fmt::Display for KeyHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Public half of a store's signing keypair.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SyncKey(VerifyingKey);

impl SyncKey {
    /// Creates a sync key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> CryptoResult<Self> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))
    }

    /// Decodes a base64 sync key.
    pub fn from_base64(text: &str) -> CryptoResult<Self> {
        let raw = STANDARD.decode(text.trim())?;
        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::invalid_length("sync key", 32, raw.len()))?;
        Self::from_bytes(&bytes)
    }

    /// Encodes the key as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0.as_bytes())
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Returns `hash(sync_key)[..8]`, embedded in every record signature.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; FINGERPRINT_LEN] {
        hash_prefix(self.as_bytes())
    }

    /// Returns the routing hint for envelopes sealed under this key.
    #[must_use]
    pub fn key_hint(&self) -> KeyHint {
        KeyHint(hash_prefix(self.box_key().as_slice()))
    }

    /// Verifies an Ed25519 signature made with the write key.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> CryptoResult<()> {
        self.0
            .verify(message, &Signature::from_bytes(signature))
            .map_err(|_| CryptoError::BadSignature)
    }

    /// Encrypts `plaintext` under `hash(sync_key)` with XChaCha20-Poly1305.
    ///
    /// The output is the ciphertext followed by a 16-byte tag. It is not
    /// readable by NaCl `secretbox` peers.
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.cipher()
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::Decryption)
    }

    /// Opens a box produced by [`SyncKey::seal`].
    pub fn open(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.cipher()
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }

    fn box_key(&self) -> Zeroizing<[u8; HASH_LEN]> {
        Zeroizing::new(hash(self.as_bytes()))
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        let key = self.box_key();
        XChaCha20Poly1305::new(Key::from_slice(key.as_slice()))
    }
}

impl fmt::Debug for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncKey({})", self.key_hint())
    }
}

/// Secret signing key that authorizes writes.
#[derive(Clone)]
pub struct WriteKey(SigningKey);

impl WriteKey {
    /// Generates a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut OsRng))
    }

    /// Creates a key from its 32-byte seed.
    #[must_use]
    pub fn from_bytes(seed: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    /// Decodes a base64 write key.
    ///
    /// Accepts the 32-byte seed or the 64-byte `seed || public` form.
    pub fn from_base64(text: &str) -> CryptoResult<Self> {
        let raw = Zeroizing::new(STANDARD.decode(text.trim())?);
        if raw.len() != 32 && raw.len() != 64 {
            return Err(CryptoError::invalid_length("write key", 32, raw.len()));
        }
        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&raw[..32]);
        let key = Self::from_bytes(&seed);
        if raw.len() == 64 && &raw[32..] != key.sync_key().as_bytes() {
            return Err(CryptoError::MalformedKey(
                "public half does not match secret seed".into(),
            ));
        }
        Ok(key)
    }

    /// Encodes the 32-byte seed as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0.to_bytes())
    }

    /// Returns the matching sync key.
    #[must_use]
    pub fn sync_key(&self) -> SyncKey {
        SyncKey(self.0.verifying_key())
    }

    /// Signs `message`.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.0.sign(message).to_bytes()
    }

    /// Proof of possession sent with privileged requests: `hash(seed)`.
    #[must_use]
    pub fn password_proof(&self) -> [u8; HASH_LEN] {
        let seed = Zeroizing::new(self.0.to_bytes());
        hash(seed.as_slice())
    }
}

impl fmt::Debug for WriteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WriteKey(..)")
    }
}

/// The keys a store is opened with.
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// Public sync key.
    pub sync: SyncKey,
    /// Write key, absent on read-only replicas.
    pub write: Option<WriteKey>,
}

impl KeyPair {
    /// Generates a new keypair with write access.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_write_key(WriteKey::generate())
    }

    /// Builds a keypair from a write key.
    #[must_use]
    pub fn from_write_key(write: WriteKey) -> Self {
        Self {
            sync: write.sync_key(),
            write: Some(write),
        }
    }

    /// Builds a read-only keypair.
    #[must_use]
    pub fn read_only(sync: SyncKey) -> Self {
        Self { sync, write: None }
    }

    /// Returns true if the write key is present.
    #[must_use]
    pub fn can_write(&self) -> bool {
        self.write.is_some()
    }
}
