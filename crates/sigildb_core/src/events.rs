//! Change feeds for observing the store.
//!
//! Two feeds are exposed:
//! - [`RecordChange`]: once per stored version, the first time its arrival
//!   passes the dispatch cursor. Delivered after the write, while the store
//!   lock is still held, so callbacks may call back into the store.
//! - [`CommitNotice`]: after every commit, telling sync sessions there may
//!   be new records to push.
//!
//! # Usage
//!
//! ```rust
//! use sigildb_core::{Config, Store};
//! use sigildb_codec::json;
//! use sigildb_crypto::KeyPair;
//!
//! let store = Store::open_in_memory(Config::new().keys(KeyPair::generate())).unwrap();
//! let changes = store.subscribe_records();
//!
//! store.set_document(json!({"type": "post", "body": "hi"})).unwrap();
//! store.commit().unwrap();
//!
//! let change = changes.try_recv().unwrap();
//! assert_eq!(change.document.doc_type(), "post");
//! ```

use parking_lot::Mutex;
use sigildb_codec::Document;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

/// A stored version that subscribers have not seen yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordChange {
    /// The document as stored.
    pub document: Document,
    /// Its base64 record signature.
    pub signature: Option<String>,
    /// Local arrival of this version.
    pub arrival: i64,
    /// Node the record came from, `None` for local writes.
    pub received_from: Option<String>,
}

/// Emitted after a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitNotice {
    /// Sessions that have not yet been asked for anything push records
    /// with arrival strictly greater than this. `None` means only sessions
    /// with an established cursor push.
    pub send_after: Option<i64>,
}

type Subscriber<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Distributes events to subscribers.
///
/// A subscriber stays registered until it reports that its receiving end
/// is gone.
pub struct ChangeFeed<T> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
}

impl<T: Clone + Send + 'static> ChangeFeed<T> {
    /// Creates a feed with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes through a channel. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        self.subscribe_with(move |event: &T| tx.send(event.clone()).is_ok());
        rx
    }

    /// Subscribes a callback. Returning `false` unsubscribes it.
    pub fn subscribe_with(&self, callback: impl Fn(&T) -> bool + Send + Sync + 'static) {
        self.subscribers.lock().push(Arc::new(callback));
    }

    /// Delivers `event` to every subscriber.
    ///
    /// The subscriber list is not locked during delivery, so callbacks may
    /// subscribe or emit.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Subscriber<T>> = self.subscribers.lock().clone();
        let gone: Vec<Subscriber<T>> = snapshot
            .into_iter()
            .filter(|subscriber| !subscriber(event))
            .collect();
        if !gone.is_empty() {
            self.subscribers
                .lock()
                .retain(|s| !gone.iter().any(|g| Arc::ptr_eq(g, s)));
        }
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: Clone + Send + 'static> Default for ChangeFeed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ChangeFeed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}
