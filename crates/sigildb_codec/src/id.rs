//! Document identifier.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace used to derive identifiers from non-UUID seeds.
///
/// Human-written ids such as `"a"` or `"#notes"` in an imported file are
/// mapped through `uuid5(SEED_NAMESPACE, seed)`, so every replica derives the
/// same identifier from the same seed.
pub const SEED_NAMESPACE: Uuid = Uuid::from_bytes([
    0x44, 0x62, 0x83, 0x38, 0x56, 0xd5, 0x46, 0x63, 0x8a, 0x29, 0xdb, 0x98, 0xda, 0xba, 0x3a, 0x31,
]);

/// Stable 128-bit identifier of a document.
///
/// The canonical text form is the lowercase hyphenated UUID, and that is
/// the only form ever written into stored JSON.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocId(Uuid);

impl DocId {
    /// Creates a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identifier from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Derives the identifier for a non-UUID seed.
    #[must_use]
    pub fn from_seed(seed: &str) -> Self {
        Self(Uuid::new_v5(&SEED_NAMESPACE, seed.as_bytes()))
    }

    /// Parses any UUID spelling (braced, simple, uppercase, urn).
    pub fn parse(text: &str) -> CodecResult<Self> {
        Uuid::parse_str(text.trim())
            .map(Self)
            .map_err(|_| CodecError::InvalidId(text.to_string()))
    }

    /// Parses a UUID, falling back to a seed-derived identifier.
    #[must_use]
    pub fn canonicalize(text: &str) -> Self {
        Self::parse(text).unwrap_or_else(|_| Self::from_seed(text))
    }

    /// Returns true if `text` is already in canonical form.
    #[must_use]
    pub fn is_canonical(text: &str) -> bool {
        Self::parse(text)
            .map(|id| id.to_string() == text)
            .unwrap_or(false)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocId({})", self.0)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for DocId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for DocId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<DocId> for Uuid {
    fn from(id: DocId) -> Self {
        id.0
    }
}

impl Serialize for DocId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DocId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_unique() {
        assert_ne!(DocId::new(), DocId::new());
    }

    #[test]
    fn parse_normalizes_spelling() {
        let id = DocId::parse("B82E3647-4411-4107-B78A-B8256CEE7A65").unwrap();
        assert_eq!(id.to_string(), "b82e3647-4411-4107-b78a-b8256cee7a65");

        let simple = DocId::parse("b82e364744114107b78ab8256cee7a65").unwrap();
        assert_eq!(simple, id);
    }

    #[test]
    fn seeds_are_deterministic() {
        assert_eq!(DocId::canonicalize("a"), DocId::canonicalize("a"));
        assert_ne!(DocId::canonicalize("a"), DocId::canonicalize("b"));
        assert_eq!(DocId::canonicalize("a"), DocId::from_seed("a"));
    }

    #[test]
    fn canonical_detection() {
        assert!(DocId::is_canonical("b82e3647-4411-4107-b78a-b8256cee7a65"));
        assert!(!DocId::is_canonical("B82E3647-4411-4107-B78A-B8256CEE7A65"));
        assert!(!DocId::is_canonical("notes"));
    }

    #[test]
    fn serde_uses_text_form() {
        let id = DocId::from_seed("x");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: DocId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
