//! Dynamic JSON document with typed access to reserved fields.

use crate::canonical::to_canonical_json;
use crate::error::{CodecError, CodecResult};
use crate::id::DocId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Names of the fields the store interprets.
pub mod fields {
    /// Stable identifier.
    pub const ID: &str = "id";
    /// Type tag. `"null"` marks a tombstone.
    pub const TYPE: &str = "type";
    /// Author timestamp in microseconds, used for conflict resolution.
    pub const TIME: &str = "time";
    /// Identifier of the parent document.
    pub const PARENT: &str = "parent";
    /// Microsecond timestamp of the last re-parenting.
    pub const MOVE_TIME: &str = "moveTime";
    /// Unlimited-depth deletion flag on tombstones.
    pub const BURN: &str = "burn";
    /// Retention channel tag.
    pub const AUTOCLEAN: &str = "autoclean";
    /// Display time; replaces `time` as the sort key when present.
    pub const DOCUMENT_TIME: &str = "documentTime";
    /// Human name. Defaults to the id.
    pub const NAME: &str = "name";
    /// Human title.
    pub const TITLE: &str = "title";
    /// Seed an imported id was derived from.
    pub const UUID5_SEED: &str = "uuid5Seed";
    /// Seed an imported parent id was derived from.
    pub const UUID5_PARENT_SEED: &str = "uuid5ParentSeed";
}

/// The reserved type of a tombstone.
pub const NULL_TYPE: &str = "null";

/// A JSON object with accessor helpers for the reserved fields.
///
/// Application fields stay in the open map and are never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tombstone for `id`.
    #[must_use]
    pub fn tombstone(id: DocId, time: i64, burn: bool) -> Self {
        let mut doc = Self::new();
        doc.set_id(id);
        doc.set_type(NULL_TYPE);
        doc.set_time(time);
        if burn {
            doc.set(fields::BURN, Value::Bool(true));
        }
        doc
    }

    /// Parses JSON text. The top level must be an object.
    pub fn from_json(text: &str) -> CodecResult<Self> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Wraps a JSON value. The value must be an object.
    pub fn from_value(value: Value) -> CodecResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(CodecError::NotAnObject {
                found: kind_of(&other),
            }),
        }
    }

    /// Encodes the document as canonical JSON text.
    pub fn to_canonical_json(&self) -> CodecResult<String> {
        to_canonical_json(&Value::Object(self.fields.clone()))
    }

    /// Returns the raw `id` field.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.fields.get(fields::ID).and_then(Value::as_str)
    }

    /// Returns the `id` field parsed as a [`DocId`].
    pub fn doc_id(&self) -> CodecResult<DocId> {
        let text = self
            .id()
            .ok_or_else(|| CodecError::invalid_field(fields::ID, "missing"))?;
        DocId::parse(text)
    }

    /// Returns the type tag, or `""` when absent.
    #[must_use]
    pub fn doc_type(&self) -> &str {
        self.fields
            .get(fields::TYPE)
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Returns true for tombstones.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.doc_type() == NULL_TYPE
    }

    /// Returns the author timestamp.
    ///
    /// Fractional values are truncated; non-numeric values read as absent.
    #[must_use]
    pub fn time(&self) -> Option<i64> {
        self.fields.get(fields::TIME).and_then(as_micros)
    }

    /// Returns the sort time: `documentTime` if set, else `time`.
    #[must_use]
    pub fn sort_time(&self) -> Option<i64> {
        self.fields
            .get(fields::DOCUMENT_TIME)
            .and_then(as_micros)
            .or_else(|| self.time())
    }

    /// Returns the parent id. An empty string reads as no parent.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.fields
            .get(fields::PARENT)
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
    }

    /// Returns the move timestamp, `0` when never moved.
    #[must_use]
    pub fn move_time(&self) -> i64 {
        self.fields
            .get(fields::MOVE_TIME)
            .and_then(as_micros)
            .unwrap_or(0)
    }

    /// Returns the burn flag.
    #[must_use]
    pub fn burn(&self) -> bool {
        self.fields
            .get(fields::BURN)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns the retention channel tag.
    #[must_use]
    pub fn autoclean(&self) -> Option<&Value> {
        self.fields.get(fields::AUTOCLEAN)
    }

    /// Returns the title, falling back to the name and then the id.
    #[must_use]
    pub fn display_title(&self) -> &str {
        [fields::TITLE, fields::NAME, fields::ID]
            .iter()
            .find_map(|key| self.fields.get(*key).and_then(Value::as_str))
            .unwrap_or("")
    }

    /// Sets the identifier.
    pub fn set_id(&mut self, id: DocId) {
        self.set(fields::ID, Value::String(id.to_string()));
    }

    /// Sets the type tag.
    pub fn set_type(&mut self, doc_type: &str) {
        self.set(fields::TYPE, Value::String(doc_type.to_string()));
    }

    /// Sets the author timestamp.
    pub fn set_time(&mut self, time: i64) {
        self.set(fields::TIME, Value::from(time));
    }

    /// Sets or clears the parent.
    pub fn set_parent(&mut self, parent: Option<DocId>) {
        match parent {
            Some(id) => {
                self.set(fields::PARENT, Value::String(id.to_string()));
            }
            None => {
                self.remove(fields::PARENT);
            }
        }
    }

    /// Sets the move timestamp.
    pub fn set_move_time(&mut self, move_time: i64) {
        self.set(fields::MOVE_TIME, Value::from(move_time));
    }

    /// Returns a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns true if the field is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Sets a field, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }

    /// Removes a field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consumes the document, returning it as a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl From<Map<String, Value>> for Document {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl TryFrom<Value> for Document {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

fn as_micros(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
