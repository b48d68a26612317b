//! Store facade.

use crate::clock::now_micros;
use crate::config::{Config, SidecarFile};
use crate::error::{StoreError, StoreResult};
use crate::events::{ChangeFeed, CommitNotice, RecordChange};
use crate::identity::{derive, machine_secret, node_seed};
use crate::lookup::Lookup;
use crate::mutation::Incoming;
use crate::state::StoreState;
use parking_lot::{Mutex, ReentrantMutex};
use sigildb_codec::{json, DocId, Document};
use sigildb_crypto::{KeyPair, NodeId, NodeIdentity, SyncKey};
use sigildb_storage::{Database, StoredRecord};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Well-known id of the database anchor document.
pub const ANCHOR_ID: &str = "b82e3647-4411-4107-b78a-b8256cee7a65";

pub(crate) struct Shared {
    state: ReentrantMutex<RefCell<Option<StoreState>>>,
    pub(crate) records: ChangeFeed<RecordChange>,
    pub(crate) commits: ChangeFeed<CommitNotice>,
    pub(crate) connected_servers: Mutex<BTreeMap<String, i64>>,
    sync_key: SyncKey,
    node: NodeIdentity,
    node_id: NodeId,
    path: Option<PathBuf>,
    servable: bool,
    sync_server: Mutex<Option<String>>,
}

/// A replicated document store.
///
/// `Store` is a cheap handle; clones share the same underlying state. Every
/// operation takes one re-entrant store-wide lock, so a record-change
/// callback may call back into the store.
///
/// # Opening a Store
///
/// ```rust
/// use sigildb_core::{Config, Store};
/// use sigildb_codec::json;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("notes.db");
/// let store = Store::open_with_config(&path, Config::new().node_secret([1; 32])).unwrap();
///
/// let id = store.set_document(json!({"type": "note", "title": "hello"})).unwrap();
/// store.commit().unwrap();
/// assert_eq!(store.get_document_by_id(&id.to_string()).unwrap().unwrap().doc_type(), "note");
/// store.close();
/// ```
#[derive(Clone)]
pub struct Store {
    pub(crate) shared: Arc<Shared>,
}

impl Store {
    /// Opens the store at `path` with default configuration.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens the store at `path`.
    ///
    /// Keys come from `config`, else from the sidecar file; a missing
    /// sidecar gets a freshly generated keypair. A path ending in `.toml`
    /// opens a read-only in-memory store populated from that file.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar is unreadable or inconsistent, or if
    /// the store file cannot be created.
    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> StoreResult<Self> {
        let path = path.as_ref();
        if path.extension().is_some_and(|ext| ext == "toml") {
            return Self::open_toml(path, config);
        }
        if !config.create_if_missing && !path.exists() {
            return Err(StoreError::config(format!(
                "{} does not exist and create_if_missing is false",
                path.display()
            )));
        }

        let sidecar_path = SidecarFile::path_for(path);
        let mut sidecar = SidecarFile::load(&sidecar_path)?.unwrap_or_default();
        let keys = match config.keys.clone() {
            Some(keys) => keys,
            None => match sidecar.keys()? {
                Some(keys) => keys,
                None => {
                    let keys = KeyPair::generate();
                    sidecar.set_keys(&keys);
                    sidecar.save(&sidecar_path)?;
                    info!(path = %sidecar_path.display(), "generated new keypair");
                    keys
                }
            },
        };

        let db = Database::open(path)?;
        let secret = machine_secret(config.node_secret)?;
        let seed = node_seed(&db)?;
        let node = derive(&secret, path, &seed, &keys);

        let options = Options {
            autoclean_days: config
                .autoclean_days
                .or(sidecar.database.autoclean_days)
                .unwrap_or(0.0),
            autoclean_probability: config.autoclean_probability,
            servable: config.servable && sidecar.sync.serve.unwrap_or(true),
            sync_server: sidecar.sync.server.clone(),
            path: Some(path.to_path_buf()),
        };
        Self::assemble(db, keys, node, options)
    }

    /// Opens a private in-memory store.
    ///
    /// Without explicit keys a fresh keypair is generated. Without a node
    /// secret the node identity is ephemeral.
    pub fn open_in_memory(config: Config) -> StoreResult<Self> {
        let keys = config.keys.clone().unwrap_or_else(KeyPair::generate);
        let db = Database::open_in_memory()?;
        let node = match config.node_secret {
            Some(secret) => derive(&secret, Path::new(""), &node_seed(&db)?, &keys),
            None => NodeIdentity::ephemeral(),
        };
        let options = Options {
            autoclean_days: config.autoclean_days.unwrap_or(0.0),
            autoclean_probability: config.autoclean_probability,
            servable: config.servable,
            sync_server: None,
            path: None,
        };
        Self::assemble(db, keys, node, options)
    }

    fn open_toml(path: &Path, config: Config) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let store = Self::open_in_memory(
            config
                .keys(KeyPair::generate())
                .servable(false)
                .autoclean_days(0.0),
        )?;
        store.import_toml(&text)?;
        store.commit()?;
        store.with_state(|state| {
            state.keys.write = None;
            Ok(())
        })?;
        info!(path = %path.display(), "opened read-only snapshot");
        Ok(store)
    }

    fn assemble(
        db: Database,
        keys: KeyPair,
        node: NodeIdentity,
        options: Options,
    ) -> StoreResult<Self> {
        let node_id = node.node_id();
        let sync_key = keys.sync;
        let state = StoreState::new(
            db,
            keys,
            node_id.to_string(),
            options.autoclean_days,
            options.autoclean_probability,
        )?;
        let store = Self {
            shared: Arc::new(Shared {
                state: ReentrantMutex::new(RefCell::new(Some(state))),
                records: ChangeFeed::new(),
                commits: ChangeFeed::new(),
                connected_servers: Mutex::new(BTreeMap::new()),
                sync_key,
                node,
                node_id,
                path: options.path,
                servable: options.servable,
                sync_server: Mutex::new(options.sync_server),
            }),
        };
        store.ensure_anchor()?;
        debug!(node = %node_id, key_hint = %sync_key.key_hint(), "store opened");
        Ok(store)
    }

    fn ensure_anchor(&self) -> StoreResult<()> {
        let missing = self.with_state(|state| {
            Ok(state.keys.can_write() && state.db.record(ANCHOR_ID)?.is_none())
        })?;
        if missing {
            self.set_document(json!({
                "id": ANCHOR_ID,
                "type": "meta",
                "name": "databaseID",
                "value": DocId::new().to_string(),
                "time": -now_micros(),
            }))?;
            self.commit()?;
        }
        Ok(())
    }

    /// Runs `f` on the locked state, then delivers the record changes it
    /// produced. Delivery happens with the lock held but the state released.
    pub(crate) fn with_state<R>(
        &self,
        f: impl FnOnce(&mut StoreState) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let guard = self.shared.state.lock();
        let (result, changes) = {
            let mut slot = guard.try_borrow_mut().map_err(|_| StoreError::Busy)?;
            let state = slot.as_mut().ok_or(StoreError::Closed)?;
            let result = f(state);
            (result, std::mem::take(&mut state.pending))
        };
        for change in &changes {
            self.shared.records.emit(change);
        }
        result
    }

    /// Closes the store. Later calls return [`StoreError::Closed`].
    ///
    /// Uncommitted writes are discarded.
    pub fn close(&self) {
        let guard = self.shared.state.lock();
        if let Ok(mut slot) = guard.try_borrow_mut() {
            if let Some(state) = slot.take() {
                if let Err(err) = state.db.rollback() {
                    debug!(error = %err, "rollback on close failed");
                }
            }
        };
    }

    /// Returns true once [`Store::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        let guard = self.shared.state.lock();
        let closed = guard.try_borrow().map_or(false, |slot| slot.is_none());
        closed
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Writes a locally authored document and returns its id.
    ///
    /// Missing `id`, `time`, `type` and `name` are filled in, and the result
    /// is signed with the write key. The write stays pending until
    /// [`Store::commit`].
    ///
    /// # Errors
    ///
    /// [`StoreError::Unauthorized`] without the write key,
    /// [`StoreError::InvalidDocument`] for malformed reserved fields.
    pub fn set_document<D>(&self, doc: D) -> StoreResult<DocId>
    where
        D: TryInto<Document>,
        StoreError: From<D::Error>,
    {
        let doc = doc.try_into()?;
        self.with_state(|state| state.set_document(Incoming::local(doc)))
    }

    /// Applies a signed record, stored verbatim if it verifies.
    ///
    /// `received_from` names the peer it came from; `None` treats it as a
    /// local import.
    pub fn apply_record(
        &self,
        json: &str,
        signature: &str,
        received_from: Option<&str>,
    ) -> StoreResult<DocId> {
        let incoming = Incoming::signed(json, signature, received_from)?;
        self.with_state(|state| state.set_document(incoming))
    }

    /// Deletes a document by writing a tombstone newer than its stored
    /// version. `burn` deletes the whole subtree on every replica.
    pub fn delete_document(&self, id: &str, burn: bool) -> StoreResult<DocId> {
        let id = DocId::canonicalize(id);
        self.with_state(|state| {
            let stored = state.load(&id.to_string())?.and_then(|(_, doc)| doc.time());
            let time = stored.map_or(now_micros(), |t| t.saturating_add(1).max(now_micros()));
            state.set_document(Incoming::local(Document::tombstone(id, time, burn)))
        })
    }

    /// Commits pending writes after running deletion propagation, then
    /// notifies sync sessions.
    pub fn commit(&self) -> StoreResult<()> {
        let earliest = self.with_state(StoreState::commit)?;
        self.shared.commits.emit(&CommitNotice {
            send_after: earliest.map(|arrival| arrival - 1),
        });
        Ok(())
    }

    /// Commits and asks every session to push, even if nothing changed.
    pub fn force_flush(&self) -> StoreResult<()> {
        self.with_state(StoreState::commit)?;
        self.shared.commits.emit(&CommitNotice { send_after: None });
        Ok(())
    }

    /// Delivers change notifications for rows written by another handle on
    /// the same file. Returns how many rows were found.
    pub fn scan_for_direct_changes(&self) -> StoreResult<usize> {
        self.with_state(StoreState::scan_for_direct_changes)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Returns the live document with `id`, `None` if it is absent,
    /// deleted, or orphaned.
    pub fn get_document_by_id(&self, id: &str) -> StoreResult<Option<Document>> {
        self.get_document(id, Lookup::Live)
    }

    /// Returns the document with `id` under a lookup mode.
    pub fn get_document(&self, id: &str, mode: Lookup) -> StoreResult<Option<Document>> {
        let id = DocId::canonicalize(id).to_string();
        self.with_state(|state| state.lookup(&id, mode))
    }

    /// Returns the stored row for `id`, tombstones included.
    pub fn get_record_by_id(&self, id: &str) -> StoreResult<Option<StoredRecord>> {
        let id = DocId::canonicalize(id).to_string();
        self.with_state(|state| Ok(state.db.record(&id)?))
    }

    /// Returns the ids from the root down to `id`.
    pub fn get_path(&self, id: &str) -> StoreResult<Vec<DocId>> {
        let id = DocId::canonicalize(id).to_string();
        self.with_state(|state| state.path(&id))
    }

    /// Returns the stored rows of every listed document together with its
    /// ancestors and descendants, keyed by id.
    pub fn related_records(&self, ids: &[&str]) -> StoreResult<BTreeMap<String, StoredRecord>> {
        self.with_state(|state| {
            let mut out = BTreeMap::new();
            for id in ids {
                state.related(&DocId::canonicalize(id).to_string(), &mut out)?;
            }
            Ok(out)
        })
    }

    /// Returns the number of stored rows, tombstones included.
    pub fn record_count(&self) -> StoreResult<u64> {
        self.with_state(|state| Ok(state.db.record_count()?))
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Subscribes to stored versions.
    pub fn subscribe_records(&self) -> std::sync::mpsc::Receiver<RecordChange> {
        self.shared.records.subscribe()
    }

    /// Subscribes a callback to stored versions.
    pub fn on_record_change(&self, callback: impl Fn(&RecordChange) -> bool + Send + Sync + 'static) {
        self.shared.records.subscribe_with(callback);
    }

    /// Subscribes to commit notices.
    pub fn subscribe_commits(&self) -> std::sync::mpsc::Receiver<CommitNotice> {
        self.shared.commits.subscribe()
    }

    /// Subscribes a callback to commit notices.
    pub fn on_commit(&self, callback: impl Fn(&CommitNotice) -> bool + Send + Sync + 'static) {
        self.shared.commits.subscribe_with(callback);
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Returns this replica's node id.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.shared.node_id
    }

    /// Returns the node signing identity.
    #[must_use]
    pub fn node_identity(&self) -> &NodeIdentity {
        &self.shared.node
    }

    /// Returns the store's sync key.
    #[must_use]
    pub fn sync_key(&self) -> SyncKey {
        self.shared.sync_key
    }

    /// Returns true if the write key is held.
    pub fn can_write(&self) -> StoreResult<bool> {
        self.with_state(|state| Ok(state.keys.can_write()))
    }

    /// Returns the store file path, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.shared.path.as_deref()
    }

    /// Returns true if the store accepts inbound sessions.
    #[must_use]
    pub fn servable(&self) -> bool {
        self.shared.servable
    }

    /// Returns the peer this store keeps a client session open to.
    #[must_use]
    pub fn sync_server(&self) -> Option<String> {
        self.shared.sync_server.lock().clone()
    }

    /// Sets the peer to keep a client session open to. `permanent` also
    /// records it in the sidecar file.
    pub fn use_sync_server(&self, server: Option<&str>, permanent: bool) -> StoreResult<()> {
        *self.shared.sync_server.lock() = server.map(str::to_string);
        if permanent {
            let Some(path) = self.path() else {
                return Err(StoreError::config("in-memory stores have no sidecar file"));
            };
            let sidecar_path = SidecarFile::path_for(path);
            let mut sidecar = SidecarFile::load(&sidecar_path)?.unwrap_or_default();
            sidecar.sync.server = server.map(str::to_string);
            sidecar.save(&sidecar_path)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.shared.path)
            .field("node_id", &self.shared.node_id)
            .finish_non_exhaustive()
    }
}

struct Options {
    autoclean_days: f64,
    autoclean_probability: f64,
    servable: bool,
    sync_server: Option<String>,
    path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory(Config::new().keys(KeyPair::generate())).unwrap()
    }

    #[test]
    fn anchor_is_created_with_write_key() {
        let store = store();
        let anchor = store.get_document_by_id(ANCHOR_ID).unwrap().unwrap();
        assert_eq!(anchor.doc_type(), "meta");
        assert!(anchor.time().unwrap() < 0);
    }

    #[test]
    fn read_only_store_has_no_anchor() {
        let keys = KeyPair::read_only(KeyPair::generate().sync);
        let store = Store::open_in_memory(Config::new().keys(keys)).unwrap();
        assert!(store.get_document_by_id(ANCHOR_ID).unwrap().is_none());
        assert!(matches!(
            store.set_document(json!({"type": "x"})),
            Err(StoreError::Unauthorized)
        ));
    }

    #[test]
    fn closed_store_rejects_calls() {
        let store = store();
        store.close();
        assert!(store.is_closed());
        assert!(matches!(store.record_count(), Err(StoreError::Closed)));
    }

    #[test]
    fn callbacks_can_reenter() {
        let store = store();
        let inner = store.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.on_record_change(move |change| {
            let id = change.document.id().unwrap_or_default().to_string();
            let found = inner.get_document_by_id(&id).ok().flatten().is_some();
            sink.lock().push(found);
            true
        });
        store.set_document(json!({"type": "post"})).unwrap();
        assert_eq!(*seen.lock(), vec![true]);
    }

    #[test]
    fn commit_notice_points_before_first_write() {
        let store = store();
        let notices = store.subscribe_commits();
        store.set_document(json!({"type": "post"})).unwrap();
        store.commit().unwrap();
        let notice = notices.try_recv().unwrap();
        let arrival = store
            .with_state(|s| Ok(s.db.max_arrival()?))
            .unwrap();
        assert_eq!(notice.send_after, Some(arrival - 1));
    }

    #[test]
    fn delete_writes_newer_tombstone() {
        let store = store();
        let id = store
            .set_document(json!({"type": "post", "time": 5_000_000_000_000_000i64}))
            .unwrap();
        store.delete_document(&id.to_string(), false).unwrap();
        let tomb = store
            .get_document(&id.to_string(), Lookup::AllowOrphans)
            .unwrap()
            .unwrap();
        assert!(tomb.is_tombstone());
        assert_eq!(tomb.time(), Some(5_000_000_000_000_001));
    }
}
