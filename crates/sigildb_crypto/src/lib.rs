//! # SigilDB Crypto
//!
//! Key material and signatures for SigilDB.
//!
//! - [`SyncKey`] / [`WriteKey`]: the store's public address and its secret
//!   authoring key.
//! - [`RecordSignature`]: detached signature over a record's JSON text.
//! - [`NodeIdentity`]: per-replica key used to sign transport messages.
//! - [`SyncKey::seal`] / [`SyncKey::open`]: the symmetric box around
//!   transport messages, keyed by `hash(sync_key)`.
//!
//! # Compatibility
//!
//! Boxes are XChaCha20-Poly1305 and every hash is BLAKE3. The framing
//! (24-byte nonce, 16-byte tag, key hints) has the same shape as NaCl
//! `secretbox` with a generic hash, but the bytes differ: peers built on
//! XSalsa20-Poly1305 and BLAKE2b cannot open these boxes, verify key
//! hints, or match record digests. Every replica of a store must run this
//! implementation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod hash;
mod keys;
mod node;
mod signature;

pub use error::{CryptoError, CryptoResult};
pub use hash::{hash, hash_prefix, keyed_hash, HASH_LEN};
pub use keys::{KeyHint, KeyPair, SyncKey, WriteKey, FINGERPRINT_LEN, KEY_HINT_LEN, NONCE_LEN};
pub use node::{NodeId, NodeIdentity};
pub use signature::{is_current, RecordSignature, DIGEST_LEN};
