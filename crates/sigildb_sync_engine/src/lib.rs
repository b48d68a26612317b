//! # SigilDB Sync Engine
//!
//! Peer-to-peer replication sessions for SigilDB.
//!
//! This crate provides:
//! - [`Session`]: the per-connection state machine
//!   (handshake → syncing → closed)
//! - [`run_session`]: drives a session over any byte stream using
//!   length-delimited frames
//! - [`SyncClient`]: keeps a store connected to a server, reconnecting with
//!   exponential backoff
//!
//! ## Protocol
//!
//! Both ends run the same logic; neither is authoritative.
//! 1. The client sends an empty message so the server learns who it is.
//! 2. Each side asks the other for records after the last arrival it has
//!    on file for that peer (`getNewArrivals`).
//! 3. Answers carry at most one batch plus the cursor they answer
//!    (`recordsStartFrom`); applying a batch triggers a request for the
//!    next one.
//! 4. Once a peer has asked for anything, new local commits are pushed to
//!    it without waiting for a request.
//!
//! Records are never echoed back to the node they came from. A session
//! whose peer turns out to be this same store (another process on the same
//! file) only relays change notifications.
//!
//! ## Key Invariants
//!
//! - A session is bound to the first node that signs a packet on it
//! - Undecodable or stale packets are dropped, never answered
//! - Store work never runs on the I/O loop

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod session;
mod transport;

pub use client::{ClientHandle, SyncClient};
pub use config::{RetryConfig, SessionConfig};
pub use error::{SyncError, SyncResult};
pub use session::{Role, Session, SessionState};
pub use transport::{framed, run_session, PacketStream, SharedSession, MAX_FRAME_LEN};
