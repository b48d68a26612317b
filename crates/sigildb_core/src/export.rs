//! Human-editable export and import of document subtrees.
//!
//! TOML exports are keyed by title so that a file kept under version control
//! diffs meaningfully. Hand-written ids such as `"intro"` or `"#intro"` are
//! mapped to seeded UUIDs on import and the seed is kept alongside.

use crate::error::{StoreError, StoreResult};
use crate::lookup::Lookup;
use crate::store::Store;
use serde_json::{Map, Value};
use sigildb_codec::{fields, DocId, Document};
use std::collections::BTreeSet;

impl Store {
    /// Exports the listed documents with all their ancestors and
    /// descendants as a pretty JSON array sorted by id. Tombstones are
    /// included.
    pub fn export_json(&self, ids: &[&str]) -> StoreResult<String> {
        let docs = self
            .related_records(ids)?
            .into_values()
            .map(|record| Document::from_json(&record.json).map(Document::into_value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(serde_json::to_string_pretty(&docs)?)
    }

    /// Exports the listed documents with all their ancestors and
    /// descendants as TOML, one table per document.
    ///
    /// Tables are ordered by tree depth, then parent title, then title, then
    /// id. A document's title becomes its heading; untitled documents are
    /// headed `#<id>`.
    pub fn export_toml(&self, ids: &[&str]) -> StoreResult<String> {
        let mut entries = Vec::new();
        for record in self.related_records(ids)?.into_values() {
            let doc = Document::from_json(&record.json)?;
            let id = doc.id().unwrap_or_default().to_string();
            let depth = self.get_path(&id)?.len();
            let parent_title = match doc.parent() {
                Some(parent) => self
                    .get_document(parent, Lookup::AllowOrphans)?
                    .map(|p| p.display_title().to_string())
                    .unwrap_or_default(),
                None => String::new(),
            };
            let title = doc.display_title().to_string();
            entries.push((depth, parent_title, title, id, doc));
        }
        entries.sort_by(|a, b| (a.0, &a.1, &a.2, &a.3).cmp(&(b.0, &b.1, &b.2, &b.3)));

        let mut out = toml::Table::new();
        for (_, _, _, id, doc) in entries {
            let mut map = doc.as_map().clone();
            let title = map
                .get(fields::TITLE)
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let heading = if !title.is_empty() && !title.starts_with('#') && !out.contains_key(&title) {
                map.remove(fields::TITLE);
                title
            } else if title.is_empty() && !out.contains_key(&format!("#{id}")) {
                map.remove(fields::ID);
                format!("#{id}")
            } else {
                format!("#{}", DocId::new())
            };
            out.insert(heading, toml::Value::Table(to_toml_table(&map)));
        }
        Ok(toml::to_string_pretty(&out)?)
    }

    /// Imports a TOML export, writing each table as a local document.
    ///
    /// Tables are applied in `time` order. Returns the number written.
    pub fn import_toml(&self, text: &str) -> StoreResult<usize> {
        let table: toml::Table = toml::from_str(text)?;
        let mut entries = Vec::with_capacity(table.len());
        for (heading, value) in table {
            let Value::Object(mut map) = serde_json::to_value(value)? else {
                return Err(StoreError::format(format!("entry {heading} is not a table")));
            };
            if let Some(id) = heading.strip_prefix('#') {
                if !map.contains_key(fields::ID) {
                    map.insert(fields::ID.into(), Value::String(id.to_string()));
                }
            } else if !map.contains_key(fields::TITLE) {
                map.insert(fields::TITLE.into(), Value::String(heading.clone()));
            }
            entries.push((heading, map));
        }
        self.import_entries(entries)
    }

    /// Imports a JSON export: an array of document objects.
    pub fn import_json(&self, text: &str) -> StoreResult<usize> {
        let Value::Array(items) = serde_json::from_str(text)? else {
            return Err(StoreError::format("expected an array of documents"));
        };
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Object(map) => entries.push((String::new(), map)),
                _ => return Err(StoreError::format("expected an array of documents")),
            }
        }
        self.import_entries(entries)
    }

    fn import_entries(&self, mut entries: Vec<(String, Map<String, Value>)>) -> StoreResult<usize> {
        entries.sort_by_key(|(heading, map)| {
            let time = Document::from(map.clone()).time().unwrap_or(0);
            (time, heading.clone())
        });
        let mut written = BTreeSet::new();
        for (heading, mut map) in entries {
            seed_ids(&mut map, &heading)?;
            let id = self.set_document(Document::from(map))?;
            written.insert(id);
        }
        self.commit()?;
        Ok(written.len())
    }
}

/// Replaces hand-written ids and parents with seeded UUIDs.
fn seed_ids(map: &mut Map<String, Value>, heading: &str) -> StoreResult<()> {
    let id = match map.get(fields::ID) {
        Some(Value::String(id)) => id.clone(),
        Some(_) => return Err(StoreError::invalid_document("id must be a string")),
        None => heading.to_string(),
    };
    if id.is_empty() {
        map.remove(fields::ID);
    } else if DocId::parse(&id).is_err() {
        map.insert(
            fields::ID.into(),
            Value::String(DocId::from_seed(&id).to_string()),
        );
        map.insert(fields::UUID5_SEED.into(), Value::String(id));
    }

    if let Some(Value::String(parent)) = map.get(fields::PARENT) {
        if !parent.is_empty() && DocId::parse(parent).is_err() {
            let seed = parent.strip_prefix('#').unwrap_or(parent).to_string();
            map.insert(
                fields::PARENT.into(),
                Value::String(DocId::from_seed(&seed).to_string()),
            );
            map.insert(fields::UUID5_PARENT_SEED.into(), Value::String(seed));
        }
    }
    Ok(())
}

fn to_toml_table(map: &Map<String, Value>) -> toml::Table {
    map.iter()
        .filter_map(|(key, value)| to_toml(value).map(|v| (key.clone(), v)))
        .collect()
}

/// TOML has no null; null fields and array elements are dropped.
fn to_toml(value: &Value) -> Option<toml::Value> {
    Some(match value {
        Value::Null => return None,
        Value::Bool(b) => toml::Value::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => toml::Value::Integer(i),
            None => toml::Value::Float(n.as_f64()?),
        },
        Value::String(s) => toml::Value::String(s.clone()),
        Value::Array(items) => toml::Value::Array(items.iter().filter_map(to_toml).collect()),
        Value::Object(map) => toml::Value::Table(to_toml_table(map)),
    })
}
