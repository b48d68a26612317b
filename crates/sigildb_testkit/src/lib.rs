//! # SigilDB Testkit
//!
//! Test utilities for SigilDB.
//!
//! This crate provides:
//! - Store fixtures backed by temporary directories
//! - Property-based document generators using proptest
//! - In-process replication helpers for driving two stores to the same
//!   state without a network
//!
//! ## Usage
//!
//! ```rust
//! use sigildb_testkit::prelude::*;
//!
//! let (a, b) = paired_stores();
//! a.set_document(json!({"type": "note", "title": "hi"})).unwrap();
//! a.commit().unwrap();
//! converge(&a, &b);
//! assert_converged(&a, &b);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod replication;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::replication::*;
    pub use sigildb_codec::json;
}

pub use fixtures::*;
pub use generators::*;
pub use replication::*;
