//! Record signatures.
//!
//! A record signature is `digest(24) || fingerprint(8) || ed25519(64)`,
//! base64 encoded, where `digest = hash(json)[..24]`, `fingerprint =
//! hash(sync_key)[..8]` and the Ed25519 signature covers the digest. The
//! fingerprint lets a replica notice records signed under a rotated key
//! without attempting verification.

use crate::error::{CryptoError, CryptoResult};
use crate::hash::hash_prefix;
use crate::keys::{SyncKey, WriteKey, FINGERPRINT_LEN};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Length of the content digest.
pub const DIGEST_LEN: usize = 24;

const SIGNATURE_LEN: usize = 64;
const ENCODED_LEN: usize = DIGEST_LEN + FINGERPRINT_LEN + SIGNATURE_LEN;

/// Detached signature over a record's JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSignature {
    digest: [u8; DIGEST_LEN],
    fingerprint: [u8; FINGERPRINT_LEN],
    signature: [u8; SIGNATURE_LEN],
}

impl RecordSignature {
    /// Signs the exact JSON text of a record.
    #[must_use]
    pub fn sign(json: &str, key: &WriteKey) -> Self {
        let digest: [u8; DIGEST_LEN] = hash_prefix(json.as_bytes());
        Self {
            digest,
            fingerprint: key.sync_key().fingerprint(),
            signature: key.sign(&digest),
        }
    }

    /// Decodes a base64 signature.
    pub fn from_base64(text: &str) -> CryptoResult<Self> {
        let raw = STANDARD.decode(text.trim())?;
        if raw.len() != ENCODED_LEN {
            return Err(CryptoError::invalid_length(
                "record signature",
                ENCODED_LEN,
                raw.len(),
            ));
        }
        let mut out = Self {
            digest: [0; DIGEST_LEN],
            fingerprint: [0; FINGERPRINT_LEN],
            signature: [0; SIGNATURE_LEN],
        };
        let (digest, rest) = raw.split_at(DIGEST_LEN);
        let (fingerprint, signature) = rest.split_at(FINGERPRINT_LEN);
        out.digest.copy_from_slice(digest);
        out.fingerprint.copy_from_slice(fingerprint);
        out.signature.copy_from_slice(signature);
        Ok(out)
    }

    /// Encodes the signature as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        let mut raw = Vec::with_capacity(ENCODED_LEN);
        raw.extend_from_slice(&self.digest);
        raw.extend_from_slice(&self.fingerprint);
        raw.extend_from_slice(&self.signature);
        STANDARD.encode(raw)
    }

    /// Returns true if the signature was made under `sync`.
    #[must_use]
    pub fn signed_under(&self, sync: &SyncKey) -> bool {
        self.fingerprint == sync.fingerprint()
    }

    /// Returns true if the digest matches `json`.
    #[must_use]
    pub fn covers(&self, json: &str) -> bool {
        self.digest == hash_prefix::<DIGEST_LEN>(json.as_bytes())
    }

    /// Checks digest, fingerprint and signature, in that order.
    pub fn verify(&self, json: &str, sync: &SyncKey) -> CryptoResult<()> {
        if !self.covers(json) {
            return Err(CryptoError::DigestMismatch);
        }
        if !self.signed_under(sync) {
            return Err(CryptoError::UnknownFingerprint);
        }
        sync.verify(&self.digest, &self.signature)
    }
}

/// Returns true if a stored base64 signature carries the current fingerprint.
///
/// Malformed signatures report `false`.
#[must_use]
pub fn is_current(signature: &str, sync: &SyncKey) -> bool {
    RecordSignature::from_base64(signature)
        .map(|sig| sig.signed_under(sync))
        .unwrap_or(false)
}
