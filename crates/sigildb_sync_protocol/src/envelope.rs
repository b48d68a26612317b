//! Signed and encrypted packet framing.
//!
//! ```text
//! 0x01 | key hint (16) | timestamp (8, LE µs) | box
//! box  = seal(nonce = timestamp | 16 zero bytes, key = hash(sync key))(
//!          sender node id (32) | Ed25519 sig (64) | timestamp (8) | payload)
//! ```
//!
//! The sender signs `timestamp | payload` with its node key. The key hint is
//! readable without the sync key so that a process hosting several stores
//! can route a connection before decrypting anything.

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::SyncMessage;
use sigildb_crypto::{KeyHint, NodeId, NodeIdentity, SyncKey, KEY_HINT_LEN, NONCE_LEN};

/// Version byte of the current envelope format.
pub const ENVELOPE_VERSION: u8 = 1;

/// Size of the cleartext header.
pub const HEADER_LEN: usize = 1 + KEY_HINT_LEN + 8;

/// Messages older than this are dropped as replays.
pub const MAX_MESSAGE_AGE_MICROS: i64 = 3_600 * 1_000_000;

const SIGNATURE_LEN: usize = 64;
const INNER_PREFIX_LEN: usize = 32 + SIGNATURE_LEN + 8;

/// An opened, authenticated packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Node that signed the packet.
    pub sender: NodeId,
    /// Sender's clock when sealing, in microseconds.
    pub timestamp: i64,
    /// The decoded message.
    pub message: SyncMessage,
}

impl Envelope {
    /// Seals `message` for every holder of `sync`, signed by `node`.
    pub fn seal(
        message: &SyncMessage,
        sync: &SyncKey,
        node: &NodeIdentity,
        timestamp: i64,
    ) -> ProtocolResult<Vec<u8>> {
        let stamp = timestamp.to_le_bytes();
        let payload = message.encode()?;

        let mut signed = Vec::with_capacity(8 + payload.len());
        signed.extend_from_slice(&stamp);
        signed.extend_from_slice(&payload);
        let signature = node.sign(&signed);

        let mut inner = Vec::with_capacity(INNER_PREFIX_LEN + payload.len());
        inner.extend_from_slice(node.node_id().as_bytes());
        inner.extend_from_slice(&signature);
        inner.extend_from_slice(&signed);
        let sealed = sync.seal(&nonce(timestamp), &inner)?;

        let mut packet = Vec::with_capacity(HEADER_LEN + sealed.len());
        packet.push(ENVELOPE_VERSION);
        packet.extend_from_slice(sync.key_hint().as_bytes());
        packet.extend_from_slice(&stamp);
        packet.extend_from_slice(&sealed);
        Ok(packet)
    }

    /// Opens a packet sealed under `sync`, checking the sender's signature
    /// and rejecting messages more than an hour older than `now`.
    pub fn open(packet: &[u8], sync: &SyncKey, now: i64) -> ProtocolResult<Self> {
        let hint = key_hint(packet)?;
        if hint != sync.key_hint() {
            return Err(ProtocolError::WrongStore);
        }
        let timestamp = read_i64(&packet[1 + KEY_HINT_LEN..HEADER_LEN]);

        let inner = sync.open(&nonce(timestamp), &packet[HEADER_LEN..])?;
        if inner.len() < INNER_PREFIX_LEN {
            return Err(ProtocolError::Truncated {
                needed: INNER_PREFIX_LEN,
                actual: inner.len(),
            });
        }
        let (sender, rest) = inner.split_at(32);
        let (signature, signed) = rest.split_at(SIGNATURE_LEN);
        let sender = NodeId::from_slice(sender).ok_or(ProtocolError::Truncated {
            needed: 32,
            actual: sender.len(),
        })?;
        let signature: [u8; SIGNATURE_LEN] =
            signature.try_into().map_err(|_| ProtocolError::Truncated {
                needed: SIGNATURE_LEN,
                actual: signature.len(),
            })?;
        sender.verify(signed, &signature)?;

        if read_i64(&signed[..8]) != timestamp {
            return Err(ProtocolError::TimestampMismatch);
        }
        let age = now.saturating_sub(timestamp);
        if age > MAX_MESSAGE_AGE_MICROS {
            return Err(ProtocolError::Stale {
                age_secs: age / 1_000_000,
            });
        }

        Ok(Self {
            sender,
            timestamp,
            message: SyncMessage::decode(&signed[8..])?,
        })
    }
}

/// Reads the routing hint from a packet header without decrypting.
pub fn key_hint(packet: &[u8]) -> ProtocolResult<KeyHint> {
    if packet.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: HEADER_LEN,
            actual: packet.len(),
        });
    }
    if packet[0] != ENVELOPE_VERSION {
        return Err(ProtocolError::UnsupportedVersion(packet[0]));
    }
    KeyHint::from_slice(&packet[1..1 + KEY_HINT_LEN]).ok_or(ProtocolError::Truncated {
        needed: HEADER_LEN,
        actual: packet.len(),
    })
}

fn nonce(timestamp: i64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..8].copy_from_slice(&timestamp.to_le_bytes());
    nonce
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    i64::from_le_bytes(raw)
}
