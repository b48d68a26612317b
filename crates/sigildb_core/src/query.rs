//! Type-range scans and full-text search.

use crate::error::StoreResult;
use crate::lookup::Lookup;
use crate::state::StoreState;
use crate::store::Store;
use sigildb_codec::{DocId, Document};
use sigildb_storage::{PageCursor, TypeRange};
use std::collections::VecDeque;

const PAGE_SIZE: usize = 100;

/// Parameters of a [`Store::documents_by_type`] scan.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeQuery {
    /// Type tag to match.
    pub doc_type: String,
    /// Restrict to children of this document.
    pub parent: Option<String>,
    /// Inclusive lower bound on sort time.
    pub start_time: i64,
    /// Inclusive upper bound on sort time.
    pub end_time: i64,
    /// Maximum documents to yield.
    pub limit: usize,
    /// Newest first when true.
    pub descending: bool,
    /// Yield documents whose parent chain is broken.
    pub allow_orphans: bool,
}

impl TypeQuery {
    /// Scans every live document of `doc_type`, newest first.
    #[must_use]
    pub fn new(doc_type: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            parent: None,
            start_time: 0,
            end_time: i64::MAX,
            limit: 100,
            descending: true,
            allow_orphans: false,
        }
    }

    /// Restricts the scan to children of `parent`.
    #[must_use]
    pub fn parent(mut self, parent: &str) -> Self {
        self.parent = Some(DocId::canonicalize(parent).to_string());
        self
    }

    /// Sets the sort-time bounds, both inclusive.
    #[must_use]
    pub fn between(mut self, start: i64, end: i64) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    /// Sets the maximum number of documents to yield.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the scan direction.
    #[must_use]
    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    /// Also yields orphans.
    #[must_use]
    pub fn allow_orphans(mut self, allow: bool) -> Self {
        self.allow_orphans = allow;
        self
    }
}

/// Lazy iterator over a type-range scan.
///
/// Pages are fetched under the store lock on demand, so writes may
/// interleave between pages. Tombstones never appear.
#[derive(Debug)]
pub struct Documents {
    store: Store,
    query: TypeQuery,
    after: Option<PageCursor>,
    buffer: VecDeque<Document>,
    yielded: usize,
    exhausted: bool,
}

impl Documents {
    fn fetch(&mut self) -> StoreResult<()> {
        let query = &self.query;
        let want = (query.limit - self.yielded).min(PAGE_SIZE);
        let range = TypeRange {
            doc_type: &query.doc_type,
            parent: query.parent.as_deref(),
            start: query.start_time,
            end: query.end_time,
            descending: query.descending,
            after: self.after,
            limit: want,
        };
        let allow_orphans = query.allow_orphans;
        let (rows, docs) = self.store.with_state(|state| {
            let rows = state.db.by_type(&range)?;
            let mut docs = Vec::with_capacity(rows.len());
            for row in &rows {
                let doc = Document::from_json(&row.json)?;
                if keep(state, &doc, allow_orphans)? {
                    docs.push(doc);
                }
            }
            Ok((rows, docs))
        })?;
        if rows.len() < want {
            self.exhausted = true;
        }
        self.after = rows.last().map(|row| row.cursor).or(self.after);
        self.buffer.extend(docs);
        Ok(())
    }
}

fn keep(state: &StoreState, doc: &Document, allow_orphans: bool) -> StoreResult<bool> {
    if doc.is_tombstone() {
        return Ok(false);
    }
    if allow_orphans {
        return Ok(true);
    }
    match doc.parent() {
        Some(parent) => Ok(state.lookup(parent, Lookup::Live)?.is_some()),
        None => Ok(true),
    }
}

impl Iterator for Documents {
    type Item = StoreResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.yielded < self.query.limit {
            if let Some(doc) = self.buffer.pop_front() {
                self.yielded += 1;
                return Some(Ok(doc));
            }
            if self.exhausted {
                return None;
            }
            if let Err(err) = self.fetch() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        None
    }
}

impl Store {
    /// Scans documents of one type ordered by sort time.
    ///
    /// The iterator is finite; to continue past `limit`, query again with
    /// new bounds.
    #[must_use]
    pub fn documents_by_type(&self, query: TypeQuery) -> Documents {
        Documents {
            store: self.clone(),
            query,
            after: None,
            buffer: VecDeque::new(),
            yielded: 0,
            exhausted: false,
        }
    }

    /// Full-text search over `tags`, `title`, `description` and `body` of
    /// documents of `doc_type`. Returns the newest `limit` matches, oldest
    /// first. Tombstones and orphans are skipped.
    pub fn search_documents(
        &self,
        query: &str,
        doc_type: &str,
        parent: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<Document>> {
        let parent = parent.map(|p| DocId::canonicalize(p).to_string());
        self.with_state(|state| {
            let mut docs = Vec::new();
            for json in state.db.search(query, doc_type, parent.as_deref(), limit)? {
                let doc = Document::from_json(&json)?;
                if keep(state, &doc, false)? {
                    docs.push(doc);
                }
            }
            docs.reverse();
            Ok(docs)
        })
    }
}
