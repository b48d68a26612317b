//! The structured message carried inside every envelope.
//!
//! All fields are optional; an empty message is a valid keep-alive and is
//! what a client sends first to announce itself. The payload is JSON with
//! camelCase field names.

use crate::error::{ProtocolError, ProtocolResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sigildb_crypto::HASH_LEN;
use std::collections::BTreeMap;

/// A sync protocol message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    /// Records being sent, oldest first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<WireRecord>>,

    /// Asks the peer for records with arrival greater than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_new_arrivals: Option<i64>,

    /// The `getNewArrivals` cursor that `records` answers. Absent on
    /// unsolicited pushes, which then prove nothing about gaps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_start_from: Option<i64>,

    /// Server address to last-contact time, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_servers: Option<BTreeMap<String, i64>>,

    /// Base64 proof that the sender holds the write key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_password: Option<String>,

    /// Documents the sender asks us to write with our key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_documents: Option<Vec<InsertDocument>>,
}

impl SyncMessage {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a request for records after `cursor`.
    #[must_use]
    pub fn request(cursor: i64) -> Self {
        Self {
            get_new_arrivals: Some(cursor),
            ..Self::default()
        }
    }

    /// Creates a batch answering a request for records after `start_from`.
    #[must_use]
    pub fn batch(records: Vec<WireRecord>, start_from: i64) -> Self {
        Self {
            records: Some(records),
            records_start_from: Some(start_from),
            ..Self::default()
        }
    }

    /// Creates an unsolicited push.
    #[must_use]
    pub fn push(records: Vec<WireRecord>) -> Self {
        Self {
            records: Some(records),
            ..Self::default()
        }
    }

    /// Attaches a connected-servers map.
    #[must_use]
    pub fn with_connected_servers(mut self, servers: BTreeMap<String, i64>) -> Self {
        self.connected_servers = Some(servers);
        self
    }

    /// Attaches documents to write, authorised by `proof`.
    #[must_use]
    pub fn with_insert(mut self, proof: &[u8; HASH_LEN], documents: Vec<InsertDocument>) -> Self {
        self.write_password = Some(STANDARD.encode(proof));
        self.insert_documents = Some(documents);
        self
    }

    /// Returns true if the message carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Decodes the write proof, if present.
    pub fn write_proof(&self) -> ProtocolResult<Option<Vec<u8>>> {
        self.write_password
            .as_deref()
            .map(|text| {
                STANDARD
                    .decode(text)
                    .map_err(|e| ProtocolError::field("writePassword", e.to_string()))
            })
            .transpose()
    }

    /// Encodes the message as its JSON payload.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a JSON payload.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A stored record on the wire: `[json, signature, arrival]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String, i64)", into = "(String, String, i64)")]
pub struct WireRecord {
    /// Exact JSON text of the document.
    pub json: String,
    /// Base64 record signature.
    pub signature: String,
    /// The sender's arrival for this record.
    pub arrival: i64,
}

impl From<(String, String, i64)> for WireRecord {
    fn from((json, signature, arrival): (String, String, i64)) -> Self {
        Self {
            json,
            signature,
            arrival,
        }
    }
}

impl From<WireRecord> for (String, String, i64) {
    fn from(record: WireRecord) -> Self {
        (record.json, record.signature, record.arrival)
    }
}

/// A privileged write request: `[json, signature]`, signature may be null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "(String, Option<String>)",
    into = "(String, Option<String>)"
)]
pub struct InsertDocument {
    /// Document JSON text.
    pub json: String,
    /// Record signature if the sender already signed it.
    pub signature: Option<String>,
}

impl From<(String, Option<String>)> for InsertDocument {
    fn from((json, signature): (String, Option<String>)) -> Self {
        Self { json, signature }
    }
}

impl From<InsertDocument> for (String, Option<String>) {
    fn from(doc: InsertDocument) -> Self {
        (doc.json, doc.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(arrival: i64) -> WireRecord {
        WireRecord {
            json: format!(r#"{{"id":"x","time":{arrival}}}"#),
            signature: "c2ln".into(),
            arrival,
        }
    }

    #[test]
    fn empty_message_is_an_empty_object() {
        let message = SyncMessage::new();
        assert!(message.is_empty());
        assert_eq!(message.encode().unwrap(), b"{}");
    }

    #[test]
    fn wire_shape_uses_camel_case_and_arrays() {
        let message = SyncMessage::batch(vec![record(7)], 3);
        let value: Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "records": [[r#"{"id":"x","time":7}"#, "c2ln", 7]],
                "recordsStartFrom": 3,
            })
        );
    }

    #[test]
    fn decodes_messages_from_peers() {
        let text = br#"{"getNewArrivals":42,"connectedServers":{"a:1":-1},"insertDocuments":[["{}",null]]}"#;
        let message = SyncMessage::decode(text).unwrap();
        assert_eq!(message.get_new_arrivals, Some(42));
        assert_eq!(message.connected_servers.unwrap()["a:1"], -1);
        assert_eq!(
            message.insert_documents.unwrap(),
            vec![InsertDocument {
                json: "{}".into(),
                signature: None
            }]
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let message = SyncMessage::decode(br#"{"getNewArrivals":1,"future":true}"#).unwrap();
        assert_eq!(message, SyncMessage::request(1));
    }

    #[test]
    fn write_proof_round_trip() {
        let proof = [9u8; HASH_LEN];
        let message = SyncMessage::new().with_insert(&proof, Vec::new());
        assert_eq!(message.write_proof().unwrap().unwrap(), proof.to_vec());

        let bad = SyncMessage {
            write_password: Some("***".into()),
            ..SyncMessage::default()
        };
        assert!(matches!(bad.write_proof(), Err(ProtocolError::Field { .. })));
    }

    #[test]
    fn rejects_wrong_record_shape() {
        assert!(SyncMessage::decode(br#"{"records":[["{}", "sig"]]}"#).is_err());
        assert!(SyncMessage::decode(b"[]").is_err());
    }
}
