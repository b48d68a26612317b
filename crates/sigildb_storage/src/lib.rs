//! # SigilDB Storage
//!
//! SQLite-backed persistence for SigilDB.
//!
//! This crate owns the on-disk layout: the `document` table holding one row
//! per document id, the `meta` and `peers` tables, the expression indices
//! over the reserved JSON fields, and a full-text index kept in step with
//! the document table by triggers. It knows nothing about conflict
//! resolution or signatures; those live in `sigildb_core`.
//!
//! ## Example
//!
//! ```rust
//! use sigildb_storage::{Database, StoredRecord};
//!
//! let db = Database::open_in_memory().unwrap();
//! db.insert_record(&StoredRecord {
//!     json: r#"{"id":"a","time":1,"type":"post"}"#.into(),
//!     signature: None,
//!     arrival: 1,
//!     received_from: None,
//! })
//! .unwrap();
//! db.commit().unwrap();
//! assert_eq!(db.max_arrival().unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod database;
mod error;
mod record;
mod schema;

pub use database::{Database, ARCHIVE_SUFFIX};
pub use error::{StorageError, StorageResult};
pub use record::{PageCursor, PageRow, PeerRow, StoredRecord, TypeRange};
