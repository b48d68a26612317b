//! # SigilDB Sync Server
//!
//! TCP sync server for SigilDB.
//!
//! This crate provides:
//! - [`SyncServer`]: accept loop with a connection limit
//! - [`StoreRegistry`]: several stores behind one port, routed by the key
//!   hint in each connection's first frame
//!
//! A server is just another replica: each accepted connection runs the
//! same session logic as a client, so servers can also dial out to other
//! servers.
//!
//! # Routing
//!
//! The first frame of a connection is read before any session exists. Its
//! cleartext key hint selects the store; frames for stores that are not
//! hosted (or not servable) end the connection without a reply.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod config;
mod error;
mod registry;
mod server;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use error::{ServerError, ServerResult};
pub use registry::StoreRegistry;
pub use server::{ServerHandle, SyncServer};
