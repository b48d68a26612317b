//! # SigilDB Sync Protocol
//!
//! Wire types for SigilDB replication.
//!
//! This crate provides:
//! - [`SyncMessage`]: the JSON message exchanged between peers
//! - [`Envelope`]: node-signed, sync-key-sealed packet framing
//! - [`key_hint`]: routing a packet to a store without decrypting it
//!
//! This is a pure protocol crate with no I/O operations. Callers supply
//! the clock.
//!
//! ## Example
//!
//! ```rust
//! use sigildb_crypto::{KeyPair, NodeIdentity};
//! use sigildb_sync_protocol::{Envelope, SyncMessage};
//!
//! let keys = KeyPair::generate();
//! let node = NodeIdentity::ephemeral();
//! let now = 1_700_000_000_000_000;
//!
//! let packet = Envelope::seal(&SyncMessage::request(1), &keys.sync, &node, now).unwrap();
//! let opened = Envelope::open(&packet, &keys.sync, now).unwrap();
//! assert_eq!(opened.sender, node.node_id());
//! assert_eq!(opened.message.get_new_arrivals, Some(1));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;
mod message;

pub use envelope::{key_hint, Envelope, ENVELOPE_VERSION, HEADER_LEN, MAX_MESSAGE_AGE_MICROS};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{InsertDocument, SyncMessage, WireRecord};
