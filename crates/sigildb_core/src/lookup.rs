//! Parent-chain resolution.

use crate::error::{StoreError, StoreResult};
use crate::state::StoreState;
use sigildb_codec::{DocId, Document};
use sigildb_storage::StoredRecord;
use std::collections::{BTreeMap, HashSet};

/// Longest parent chain followed before assuming a cycle.
pub const MAX_PARENT_DEPTH: usize = 64;

/// How a lookup treats deleted ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lookup {
    /// Live documents only: tombstones and orphans read as absent.
    #[default]
    Live,
    /// The stored version as is, tombstones and orphans included.
    AllowOrphans,
    /// The first tombstone on the chain starting at the document itself,
    /// else the document. `None` if the chain is broken.
    AncestorNull,
}

impl StoreState {
    /// Resolves `id` under `mode`.
    pub(crate) fn lookup(&self, id: &str, mode: Lookup) -> StoreResult<Option<Document>> {
        let Some((_, doc)) = self.load(id)? else {
            return Ok(None);
        };
        match mode {
            Lookup::AllowOrphans => return Ok(Some(doc)),
            Lookup::AncestorNull if doc.is_tombstone() => return Ok(Some(doc)),
            Lookup::Live if doc.is_tombstone() => return Ok(None),
            _ => {}
        }

        let mut parent = doc.parent().map(str::to_string);
        let mut depth = 0;
        while let Some(next) = parent {
            depth += 1;
            if depth > MAX_PARENT_DEPTH {
                return Err(StoreError::ReferenceCycle { id: next });
            }
            let Some((_, ancestor)) = self.load(&next)? else {
                return Ok(None);
            };
            if ancestor.is_tombstone() {
                return Ok(match mode {
                    Lookup::AncestorNull => Some(ancestor),
                    _ => None,
                });
            }
            parent = ancestor.parent().map(str::to_string);
        }

        Ok(Some(doc))
    }

    /// Returns the ids from the root down to `id`, following stored
    /// versions whatever their state. Stops at the first missing ancestor.
    pub(crate) fn path(&self, id: &str) -> StoreResult<Vec<DocId>> {
        let mut path = Vec::new();
        let mut next = Some(id.to_string());
        while let Some(current) = next {
            if path.len() > MAX_PARENT_DEPTH {
                return Err(StoreError::ReferenceCycle { id: current });
            }
            let Some((_, doc)) = self.load(&current)? else {
                break;
            };
            path.push(DocId::parse(&current)?);
            next = doc.parent().map(str::to_string);
        }
        path.reverse();
        Ok(path)
    }

    /// Collects the stored rows needed to reproduce `id` elsewhere: its
    /// ancestors, itself and every descendant.
    pub(crate) fn related(
        &self,
        id: &str,
        out: &mut BTreeMap<String, StoredRecord>,
    ) -> StoreResult<()> {
        let Some(record) = self.db.record(id)? else {
            return Ok(());
        };

        let mut parent = Document::from_json(&record.json)?
            .parent()
            .map(str::to_string);
        let mut depth = 0;
        while let Some(current) = parent {
            depth += 1;
            if depth > MAX_PARENT_DEPTH || out.contains_key(&current) {
                break;
            }
            let Some(ancestor) = self.db.record(&current)? else {
                break;
            };
            parent = Document::from_json(&ancestor.json)?
                .parent()
                .map(str::to_string);
            out.insert(current, ancestor);
        }

        let mut stack = vec![(id.to_string(), record)];
        let mut seen = HashSet::new();
        while let Some((current, row)) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for child in self.db.children(&current)? {
                if let Some(child_id) = Document::from_json(&child.json)?.id() {
                    stack.push((child_id.to_string(), child));
                }
            }
            out.insert(current, row);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigildb_crypto::KeyPair;
    use sigildb_storage::Database;

    fn state_with(rows: &[(&str, Option<&str>, &str)]) -> StoreState {
        let db = Database::open_in_memory().unwrap();
        for (n, (id, parent, doc_type)) in rows.iter().enumerate() {
            let json = match parent {
                Some(p) => format!(r#"{{"id":"{id}","parent":"{p}","time":1,"type":"{doc_type}"}}"#),
                None => format!(r#"{{"id":"{id}","time":1,"type":"{doc_type}"}}"#),
            };
            db.insert_record(&StoredRecord {
                json,
                signature: None,
                arrival: n as i64 + 1,
                received_from: None,
            })
            .unwrap();
        }
        StoreState::new(db, KeyPair::generate(), "n".into(), 0.0, 0.0).unwrap()
    }

    #[test]
    fn live_lookup_hides_orphans_and_tombstones() {
        let state = state_with(&[
            ("root", None, "null"),
            ("child", Some("root"), "post"),
            ("grandchild", Some("child"), "post"),
            ("lost", Some("missing"), "post"),
        ]);
        assert!(state.lookup("grandchild", Lookup::Live).unwrap().is_none());
        assert!(state.lookup("lost", Lookup::Live).unwrap().is_none());
        assert!(state.lookup("lost", Lookup::AllowOrphans).unwrap().is_some());
        assert!(state.lookup("root", Lookup::Live).unwrap().is_none());
    }

    #[test]
    fn ancestor_null_returns_nearest_tombstone() {
        let state = state_with(&[
            ("root", None, "null"),
            ("mid", Some("root"), "null"),
            ("leaf", Some("mid"), "post"),
        ]);
        let tomb = state.lookup("leaf", Lookup::AncestorNull).unwrap().unwrap();
        assert_eq!(tomb.id(), Some("mid"));
        let itself = state.lookup("root", Lookup::AncestorNull).unwrap().unwrap();
        assert_eq!(itself.id(), Some("root"));
    }

    #[test]
    fn ancestor_null_on_live_chain_returns_document() {
        let state = state_with(&[("root", None, "post"), ("leaf", Some("root"), "post")]);
        let doc = state.lookup("leaf", Lookup::AncestorNull).unwrap().unwrap();
        assert_eq!(doc.id(), Some("leaf"));
        assert!(!doc.is_tombstone());
    }

    #[test]
    fn cycles_are_reported() {
        let state = state_with(&[("a", Some("b"), "post"), ("b", Some("a"), "post")]);
        assert!(matches!(
            state.lookup("a", Lookup::Live),
            Err(StoreError::ReferenceCycle { .. })
        ));
    }

    #[test]
    fn related_collects_ancestors_and_descendants() {
        let state = state_with(&[
            ("root", None, "post"),
            ("mid", Some("root"), "post"),
            ("leaf", Some("mid"), "post"),
            ("other", None, "post"),
        ]);
        let mut out = BTreeMap::new();
        state.related("mid", &mut out).unwrap();
        let ids: Vec<_> = out.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["leaf", "mid", "root"]);
    }
}
