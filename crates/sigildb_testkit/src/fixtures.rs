//! Store fixtures.
//!
//! Every fixture carries an explicit keypair and machine secret so tests
//! never touch the user's home directory.

use sigildb_core::{Config, Store};
use sigildb_crypto::KeyPair;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Machine secret shared by all fixtures.
pub const TEST_NODE_SECRET: [u8; 32] = [7; 32];

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Store,
    /// The keys the store was opened with.
    pub keys: KeyPair,
    dir: Option<TempDir>,
}

impl TestStore {
    /// Creates an in-memory store with fresh keys.
    pub fn memory() -> Self {
        Self::memory_with(KeyPair::generate())
    }

    /// Creates an in-memory store sharing `keys`.
    pub fn memory_with(keys: KeyPair) -> Self {
        let store = Store::open_in_memory(config(&keys)).expect("Failed to open in-memory store");
        Self {
            store,
            keys,
            dir: None,
        }
    }

    /// Creates a file-backed store with fresh keys.
    pub fn file() -> Self {
        Self::file_with(KeyPair::generate())
    }

    /// Creates a file-backed store sharing `keys`.
    pub fn file_with(keys: KeyPair) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("test.db");
        let store = Store::open_with_config(&path, config(&keys)).expect("Failed to open file store");
        Self {
            store,
            keys,
            dir: Some(dir),
        }
    }

    /// Returns the store file if file-backed.
    pub fn path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.path().join("test.db"))
    }

    /// Returns the temporary directory if file-backed.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Closes and reopens a file-backed store.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores, which do not survive closing.
    pub fn reopen(&mut self) {
        let path = self.path().expect("Only file stores can be reopened");
        self.store.close();
        self.store = Store::open_with_config(&path, config(&self.keys)).expect("Failed to reopen store");
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl Drop for TestStore {
    fn drop(&mut self) {
        self.store.close();
    }
}

fn config(keys: &KeyPair) -> Config {
    Config::new().keys(keys.clone()).node_secret(TEST_NODE_SECRET)
}

/// Creates two in-memory replicas of one store.
pub fn paired_stores() -> (TestStore, TestStore) {
    let keys = KeyPair::generate();
    (TestStore::memory_with(keys.clone()), TestStore::memory_with(keys))
}

/// Creates `n` file-backed replicas of one store.
pub fn file_replicas(n: usize) -> Vec<TestStore> {
    let keys = KeyPair::generate();
    (0..n).map(|_| TestStore::file_with(keys.clone())).collect()
}

/// Creates a replica that holds the sync key but cannot write.
pub fn read_only_replica(of: &TestStore) -> TestStore {
    TestStore::memory_with(KeyPair::read_only(of.keys.sync))
}

/// Runs a test with a temporary in-memory store.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigildb_codec::json;

    #[test]
    fn file_store_survives_reopen() {
        let mut test_store = TestStore::file();
        let id = test_store.set_document(json!({"type": "note"})).unwrap();
        test_store.commit().unwrap();
        test_store.reopen();
        assert!(test_store.get_document_by_id(&id.to_string()).unwrap().is_some());
    }

    #[test]
    fn replicas_share_keys() {
        let (a, b) = paired_stores();
        assert_eq!(a.sync_key().key_hint(), b.sync_key().key_hint());
        assert_ne!(a.node_id(), b.node_id());
    }

    #[test]
    fn read_only_replica_cannot_write() {
        let owner = TestStore::memory();
        let reader = read_only_replica(&owner);
        assert!(!reader.can_write().unwrap());
        assert!(reader.set_document(json!({"type": "note"})).is_err());
    }

    #[test]
    fn with_temp_store_runs() {
        let anchored = with_temp_store(|store| {
            store.get_document_by_id(sigildb_core::ANCHOR_ID).unwrap().is_some()
        });
        assert!(anchored);
    }
}
