//! Stores hosted by a server, keyed by the routing hint of their sync key.

use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use sigildb_core::Store;
use sigildb_crypto::KeyHint;
use std::collections::HashMap;
use tracing::{debug, info};

/// The stores a server can route connections to.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    stores: RwLock<HashMap<KeyHint, Store>>,
}

impl StoreRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hosts `store`. A store registered under the same sync key is
    /// replaced.
    pub fn register(&self, store: Store) -> ServerResult<KeyHint> {
        if !store.servable() {
            return Err(ServerError::NotServable);
        }
        let hint = store.sync_key().key_hint();
        info!(hint = %hint, node = %store.node_id(), "hosting store");
        self.stores.write().insert(hint, store);
        Ok(hint)
    }

    /// Stops hosting the store with this hint.
    pub fn unregister(&self, hint: &KeyHint) -> Option<Store> {
        self.stores.write().remove(hint)
    }

    /// Returns the open store for `hint`, forgetting it if it was closed.
    pub fn get(&self, hint: &KeyHint) -> Option<Store> {
        let store = self.stores.read().get(hint).cloned()?;
        if store.is_closed() {
            debug!(hint = %hint, "dropping closed store");
            self.stores.write().remove(hint);
            return None;
        }
        Some(store)
    }

    /// Returns the hints of all hosted stores.
    pub fn hints(&self) -> Vec<KeyHint> {
        let mut hints: Vec<_> = self.stores.read().keys().copied().collect();
        hints.sort();
        hints
    }

    /// Returns the number of hosted stores.
    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    /// Returns true if no store is hosted.
    pub fn is_empty(&self) -> bool {
        self.stores.read().is_empty()
    }
}
