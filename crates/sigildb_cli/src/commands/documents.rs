//! Document commands: put, get, list, search, delete.

use crate::error::{CliError, CliResult};
use sigildb_codec::{Document, Value};
use sigildb_core::{Lookup, Store, TypeQuery};
use std::io::Write;

fn print(doc: &Document, out: &mut impl Write) -> CliResult<()> {
    writeln!(out, "{}", serde_json::to_string(doc.as_map())?)?;
    Ok(())
}

/// Writes a document given as JSON text and prints its id.
pub fn put(store: &Store, json: &str, out: &mut impl Write) -> CliResult<()> {
    let value: Value = serde_json::from_str(json)?;
    if !value.is_object() {
        return Err(CliError::usage("a document must be a JSON object"));
    }
    let id = store.set_document(value)?;
    store.commit()?;
    writeln!(out, "{id}")?;
    Ok(())
}

/// Prints one document. `raw` shows tombstones and orphans too.
pub fn get(store: &Store, id: &str, raw: bool, out: &mut impl Write) -> CliResult<()> {
    let mode = if raw { Lookup::AllowOrphans } else { Lookup::Live };
    match store.get_document(id, mode)? {
        Some(doc) => {
            writeln!(out, "{}", serde_json::to_string_pretty(doc.as_map())?)?;
            Ok(())
        }
        None => Err(CliError::usage(format!("no document {id}"))),
    }
}

/// Prints documents of one type, newest first, one per line.
pub fn list(
    store: &Store,
    doc_type: &str,
    parent: Option<&str>,
    limit: usize,
    out: &mut impl Write,
) -> CliResult<usize> {
    let mut query = TypeQuery::new(doc_type).limit(limit);
    if let Some(parent) = parent {
        query = query.parent(parent);
    }
    let mut count = 0;
    for doc in store.documents_by_type(query) {
        print(&doc?, out)?;
        count += 1;
    }
    Ok(count)
}

/// Prints full-text matches, oldest first, one per line.
pub fn search(
    store: &Store,
    query: &str,
    doc_type: &str,
    parent: Option<&str>,
    limit: usize,
    out: &mut impl Write,
) -> CliResult<usize> {
    let docs = store.search_documents(query, doc_type, parent, limit)?;
    for doc in &docs {
        print(doc, out)?;
    }
    Ok(docs.len())
}

/// Deletes a document; `burn` takes its whole subtree with it.
pub fn delete(store: &Store, id: &str, burn: bool, out: &mut impl Write) -> CliResult<()> {
    let id = store.delete_document(id, burn)?;
    store.commit()?;
    writeln!(out, "deleted {id}{}", if burn { " (burned)" } else { "" })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigildb_core::Config;
    use sigildb_crypto::KeyPair;

    fn store() -> Store {
        Store::open_in_memory(Config::new().keys(KeyPair::generate())).unwrap()
    }

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn put_then_get() {
        let store = store();
        let mut out = Vec::new();
        put(&store, r#"{"type":"note","title":"groceries"}"#, &mut out).unwrap();
        let id = text(out).trim().to_string();

        let mut out = Vec::new();
        get(&store, &id, false, &mut out).unwrap();
        assert!(text(out).contains("groceries"));
    }

    #[test]
    fn put_rejects_non_objects() {
        let store = store();
        assert!(matches!(put(&store, "[1, 2]", &mut Vec::new()), Err(CliError::Usage(_))));
        assert!(matches!(put(&store, "{", &mut Vec::new()), Err(CliError::Json(_))));
    }

    #[test]
    fn list_children_and_search() {
        let store = store();
        put(&store, r#"{"id":"list","type":"list","title":"chores"}"#, &mut Vec::new()).unwrap();
        put(&store, r#"{"type":"item","parent":"list","title":"sweep the porch"}"#, &mut Vec::new()).unwrap();
        put(&store, r#"{"type":"item","title":"loose item"}"#, &mut Vec::new()).unwrap();

        let mut out = Vec::new();
        assert_eq!(list(&store, "item", Some("list"), 10, &mut out).unwrap(), 1);
        assert!(text(out).contains("sweep"));
        assert_eq!(list(&store, "item", None, 10, &mut Vec::new()).unwrap(), 2);

        let mut out = Vec::new();
        assert_eq!(search(&store, "porch", "item", None, 10, &mut out).unwrap(), 1);
        assert!(text(out).contains("sweep the porch"));
    }

    #[test]
    fn deleted_documents_only_show_raw() {
        let store = store();
        put(&store, r#"{"id":"gone","type":"note"}"#, &mut Vec::new()).unwrap();
        delete(&store, "gone", false, &mut Vec::new()).unwrap();

        assert!(get(&store, "gone", false, &mut Vec::new()).is_err());
        let mut out = Vec::new();
        get(&store, "gone", true, &mut out).unwrap();
        assert!(text(out).contains(r#""type": "null""#));
    }
}
