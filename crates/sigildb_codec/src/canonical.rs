//! Canonical JSON text.
//!
//! Stored records are signed over their exact JSON text, so locally authored
//! documents are always written in one form: compact, with object keys sorted
//! bytewise at every nesting level. Records received from peers are stored
//! verbatim and never re-encoded.

use crate::error::CodecResult;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

struct Sorted<'a>(&'a Value);

impl Serialize for Sorted<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    out.serialize_entry(key, &Sorted(value))?;
                }
                out.end()
            }
            Value::Array(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(&Sorted(item))?;
                }
                out.end()
            }
            other => other.serialize(serializer),
        }
    }
}

/// Encodes a JSON value in canonical form.
pub fn to_canonical_json(value: &Value) -> CodecResult<String> {
    Ok(serde_json::to_string(&Sorted(value))?)
}
