//! # SigilDB Codec
//!
//! Document model for SigilDB.
//!
//! A document is an open JSON object. A handful of reserved fields (`id`,
//! `type`, `time`, `parent`, `moveTime`, `burn`, `autoclean`) drive
//! replication and conflict resolution; everything else belongs to the
//! application.
//!
//! ## Canonical text
//!
//! Locally authored documents are encoded with object keys sorted at every
//! level and no insignificant whitespace, so the same document always yields
//! the same bytes to sign.
//!
//! ## Usage
//!
//! ```
//! use sigildb_codec::{DocId, Document};
//!
//! let mut doc = Document::from_json(r#"{"type":"post","body":"hello"}"#).unwrap();
//! doc.set_id(DocId::from_seed("welcome"));
//! doc.set_time(100);
//!
//! let text = doc.to_canonical_json().unwrap();
//! assert!(text.starts_with(r#"{"body":"hello","id":"#));
//! assert_eq!(Document::from_json(&text).unwrap(), doc);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod canonical;
mod document;
mod error;
mod id;

pub use canonical::to_canonical_json;
pub use document::{fields, Document, NULL_TYPE};
pub use error::{CodecError, CodecResult};
pub use id::{DocId, SEED_NAMESPACE};

pub use serde_json::{json, Map, Value};
