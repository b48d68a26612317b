//! # SigilDB Core
//!
//! Replicated JSON document store engine for SigilDB.
//!
//! This crate provides:
//! - The [`Store`] facade over one SQLite-backed document table
//! - The write pipeline: signature checks, move safety, last-writer-wins on
//!   `time`, and deletion propagation through the parent tree
//! - Change feeds for record subscribers and sync sessions
//! - Peer bookkeeping and outbound batches for the sync engine
//! - TOML and JSON export/import of document subtrees
//!
//! ## Example
//!
//! ```rust
//! use sigildb_core::{Config, Lookup, Store};
//! use sigildb_codec::json;
//! use sigildb_crypto::KeyPair;
//!
//! let store = Store::open_in_memory(Config::new().keys(KeyPair::generate())).unwrap();
//! store.set_document(json!({"id": "a", "type": "post", "time": 100})).unwrap();
//! store.set_document(json!({"id": "b", "type": "post", "time": 101, "parent": "a"})).unwrap();
//! store.set_document(json!({"id": "a", "type": "null", "burn": true, "time": 200})).unwrap();
//! store.commit().unwrap();
//!
//! assert!(store.get_document("a", Lookup::AllowOrphans).unwrap().unwrap().is_tombstone());
//! assert!(store.get_document_by_id("b").unwrap().is_none());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod error;
mod events;
mod export;
mod identity;
mod lookup;
mod mutation;
mod query;
mod replication;
mod state;
mod store;

pub use clock::now_micros;
pub use config::{
    Config, DatabaseSection, SidecarFile, SyncSection, DEFAULT_AUTOCLEAN_PROBABILITY,
    SIDECAR_SUFFIX,
};
pub use error::{StoreError, StoreResult};
pub use events::{ChangeFeed, CommitNotice, RecordChange};
pub use identity::{default_secret_path, load_or_create_secret};
pub use lookup::{Lookup, MAX_PARENT_DEPTH};
pub use query::{Documents, TypeQuery};
pub use replication::{BatchOutcome, InboundRecord, OutboundBatch, StateDigest, BATCH_SIZE};
pub use store::{Store, ANCHOR_ID};

pub use sigildb_storage::{PeerRow, StoredRecord};
