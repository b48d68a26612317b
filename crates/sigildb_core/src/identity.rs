//! Node identity derivation.
//!
//! The node key is `keyed_hash(machine_secret, basename || nodeIDSeed ||
//! write_key)`. The seed is random per store file and kept in the `meta`
//! table, so a deleted and recreated file gets a new identity, and so does a
//! replica that gains the write key.

use crate::error::StoreResult;
use rand::RngCore;
use sigildb_crypto::{KeyPair, NodeIdentity, WriteKey};
use sigildb_storage::Database;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Meta key holding the per-file identity seed.
pub(crate) const NODE_SEED_KEY: &str = "nodeIDSeed";

const SEED_BYTES: usize = 24;

/// Reads the identity seed, creating it on first open.
pub(crate) fn node_seed(db: &Database) -> StoreResult<String> {
    if let Some(seed) = db.get_meta(NODE_SEED_KEY)? {
        return Ok(seed);
    }
    let mut raw = [0u8; SEED_BYTES];
    rand::thread_rng().fill_bytes(&mut raw);
    let seed = to_hex(&raw);
    db.set_meta(NODE_SEED_KEY, &seed)?;
    db.commit()?;
    Ok(seed)
}

/// Derives the node identity for a store file.
pub(crate) fn derive(secret: &[u8; 32], path: &Path, seed: &str, keys: &KeyPair) -> NodeIdentity {
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let write = keys
        .write
        .as_ref()
        .map(WriteKey::to_base64)
        .unwrap_or_default();
    let material = format!("{basename}{seed}{write}");
    NodeIdentity::derive(secret, material.as_bytes())
}

/// Returns the default location of the machine secret.
#[must_use]
pub fn default_secret_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sigildb").join("node-secret"))
}

/// Loads the machine secret from `path`, creating it if missing.
pub fn load_or_create_secret(path: &Path) -> StoreResult<[u8; 32]> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.len() == 32 => {
            let mut secret = [0u8; 32];
            secret.copy_from_slice(&bytes);
            return Ok(secret);
        }
        Ok(bytes) => {
            warn!(path = %path.display(), len = bytes.len(), "node secret has the wrong size, replacing it");
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, secret)?;
    debug!(path = %path.display(), "created node secret");
    Ok(secret)
}

/// Resolves the machine secret: explicit, else the default file, else a
/// random one that only lives as long as the process.
pub(crate) fn machine_secret(explicit: Option<[u8; 32]>) -> StoreResult<[u8; 32]> {
    if let Some(secret) = explicit {
        return Ok(secret);
    }
    match default_secret_path() {
        Some(path) => load_or_create_secret(&path),
        None => {
            warn!("no user config directory, node identity will not survive a restart");
            let mut secret = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut secret);
            Ok(secret)
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
