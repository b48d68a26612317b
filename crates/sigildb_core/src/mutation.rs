//! The write pipeline and tombstone propagation.
//!
//! Every version, local or remote, passes through [`StoreState::set_document`]:
//!
//! 1. normalize (local) or validate (signed) the reserved fields
//! 2. verify the signature, or require the write key
//! 3. move safety: an older move never undoes a newer one
//! 4. ancestor check: descendants of burned or deleted parents are dropped
//! 5. autoclean channels are immutable once set
//! 6. last writer wins on `time`
//! 7. insert with a fresh arrival, queue tombstones for propagation
//! 8. deliver the change, then maybe purge the retention channel

use crate::clock::{now_micros, DAY_MICROS};
use crate::error::{StoreError, StoreResult};
use crate::lookup::Lookup;
use crate::state::StoreState;
use rand::Rng;
use serde_json::Value;
use sigildb_codec::{fields, DocId, Document};
use sigildb_crypto::{CryptoError, RecordSignature};
use sigildb_storage::StoredRecord;
use std::collections::HashSet;
use tracing::{debug, trace};

/// Propagation depth for local and burn tombstones.
pub(crate) const MAX_PROPAGATION_DEPTH: u32 = 128;

const PROPAGATION_PAGE: usize = 1000;

/// A version on its way into the store.
#[derive(Debug, Clone)]
pub(crate) struct Incoming {
    doc: Document,
    /// Exact JSON text when it came signed; re-encoded otherwise.
    json: Option<String>,
    signature: Option<String>,
    received_from: Option<String>,
}

impl Incoming {
    /// A locally authored document, normalized and signed on the way in.
    pub(crate) fn local(doc: Document) -> Self {
        Self {
            doc,
            json: None,
            signature: None,
            received_from: None,
        }
    }

    /// A signed record, stored verbatim if it verifies.
    pub(crate) fn signed(
        json: &str,
        signature: &str,
        received_from: Option<&str>,
    ) -> StoreResult<Self> {
        Ok(Self {
            doc: Document::from_json(json)?,
            json: Some(json.to_string()),
            signature: Some(signature.to_string()),
            received_from: received_from.map(str::to_string),
        })
    }
}

impl StoreState {
    /// Runs one version through the write pipeline and returns its id.
    ///
    /// Versions that lose to what is stored are discarded without error.
    pub(crate) fn set_document(&mut self, incoming: Incoming) -> StoreResult<DocId> {
        let Incoming {
            mut doc,
            json,
            mut signature,
            received_from,
        } = incoming;
        let remote = received_from.is_some();

        let id = match json {
            Some(_) => validate_signed(&doc)?,
            None => normalize_local(&mut doc)?,
        };
        let id_text = id.to_string();

        match (&json, &signature) {
            (Some(text), Some(sig_text)) => {
                let sig = RecordSignature::from_base64(sig_text)?;
                match sig.verify(text, &self.keys.sync) {
                    Ok(()) => {}
                    Err(CryptoError::UnknownFingerprint) if !remote && self.keys.can_write() => {
                        debug!(id = %id_text, "record signed under another key, re-signing");
                        signature = None;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            _ if !self.keys.can_write() => return Err(StoreError::Unauthorized),
            _ => {}
        }

        let old = self.load(&id_text)?;

        if json.is_none() {
            if let Some((_, old_doc)) = &old {
                apply_move_safety(&mut doc, old_doc)?;
            }
        }

        if let Some(parent) = doc.parent().map(str::to_string) {
            if let Some(tomb) = self
                .lookup(&parent, Lookup::AncestorNull)?
                .filter(Document::is_tombstone)
            {
                let tomb_time = tomb.time().unwrap_or(i64::MIN);
                let doc_time = doc.time().unwrap_or(i64::MIN);
                if tomb.burn() && tomb_time > doc_time && tomb_time > doc.move_time() {
                    if !self.keys.can_write() {
                        debug!(id = %id_text, "dropping descendant of a burned ancestor");
                        return Ok(id);
                    }
                    debug!(id = %id_text, "burning descendant of a burned ancestor");
                    return self.set_document(Incoming::local(Document::tombstone(
                        id, tomb_time, true,
                    )));
                }
                if !tomb.burn() && tomb.id() == Some(parent.as_str()) && tomb_time > doc_time {
                    debug!(id = %id_text, "dropping child of a newer tombstone");
                    return Ok(id);
                }
            }
        }

        if let (Some((_, old_doc)), Some(channel)) = (&old, doc.autoclean()) {
            if old_doc.autoclean() != Some(channel) {
                if remote {
                    debug!(id = %id_text, "dropping autoclean change from peer");
                    return Ok(id);
                }
                return Err(StoreError::invalid_document(
                    "autoclean cannot be changed once set",
                ));
            }
        }

        let text = match json {
            Some(text) => text,
            None => doc.to_canonical_json()?,
        };
        let signature = match signature {
            Some(sig) => sig,
            None => {
                let write = self.keys.write.as_ref().ok_or(StoreError::Unauthorized)?;
                RecordSignature::sign(&text, write).to_base64()
            }
        };

        if received_from.as_deref() != Some(self.node_id.as_str()) {
            if let Some((_, old_doc)) = &old {
                if old_doc.time() >= doc.time() {
                    trace!(id = %id_text, "discarding version that is not newer");
                    return Ok(id);
                }
                self.db.delete_record(&id_text)?;
            }
            let arrival = self.next_arrival()?;
            self.db.insert_record(&StoredRecord {
                json: text,
                signature: Some(signature),
                arrival,
                received_from: received_from.clone(),
            })?;
            if doc.is_tombstone() {
                self.null_queue.insert(id_text.clone(), received_from);
            } else {
                self.null_queue.remove(&id_text);
            }
        }

        if let Some(stored) = self.db.record(&id_text)? {
            self.dispatch(&stored);
        }

        if let Some(channel) = doc.autoclean() {
            self.maybe_purge(&doc, channel, &id_text)?;
        }

        Ok(id)
    }

    fn maybe_purge(&self, doc: &Document, channel: &Value, id: &str) -> StoreResult<()> {
        if self.autoclean_days <= 0.0 {
            return Ok(());
        }
        if rand::thread_rng().gen::<f64>() >= self.autoclean_probability {
            return Ok(());
        }
        let window = (self.autoclean_days * DAY_MICROS as f64) as i64;
        let horizon = doc
            .sort_time()
            .unwrap_or(i64::MAX)
            .min(now_micros().saturating_sub(window));
        self.db.purge_channel(
            &serde_json::to_string(channel)?,
            doc.parent().unwrap_or(""),
            doc.doc_type(),
            horizon,
            id,
        )?;
        Ok(())
    }

    /// Starts propagation for a queued tombstone.
    pub(crate) fn propagate_from(&mut self, id: &str, received_from: Option<&str>) -> StoreResult<()> {
        let Some((_, tomb)) = self.load(id)? else {
            return Ok(());
        };
        if !tomb.is_tombstone() {
            return Ok(());
        }
        let burn = tomb.burn();
        let depth = if received_from.is_some() && !burn {
            1
        } else {
            MAX_PROPAGATION_DEPTH
        };
        let time = tomb.time().unwrap_or(i64::MIN);
        let mut seen = HashSet::new();
        self.propagate_nulls(id, time, burn, depth, &mut seen)
    }

    /// Deletes the descendants of `id` whose `time` is below `time`.
    ///
    /// Burned subtrees are replaced with signed burn tombstones when the
    /// write key is held, so the deletion replicates; otherwise rows are
    /// removed outright.
    fn propagate_nulls(
        &mut self,
        id: &str,
        time: i64,
        burn: bool,
        depth: u32,
        seen: &mut HashSet<String>,
    ) -> StoreResult<()> {
        if depth == 0 || !seen.insert(id.to_string()) {
            return Ok(());
        }
        loop {
            let children = self.db.children_older_than(id, time, PROPAGATION_PAGE)?;
            let mut progressed = false;
            for json in children {
                let child_id = match Document::from_json(&json).map(|c| c.id().map(str::to_string)) {
                    Ok(Some(child_id)) => child_id,
                    _ => continue,
                };
                if seen.contains(&child_id) {
                    continue;
                }
                if burn && self.keys.can_write() {
                    let tomb = Document::tombstone(DocId::canonicalize(&child_id), time, true);
                    self.set_document(Incoming::local(tomb))?;
                } else {
                    self.db.delete_if_not_newer(&child_id, time)?;
                }
                progressed = true;
                self.propagate_nulls(&child_id, time, burn, depth - 1, seen)?;
            }
            if !progressed {
                return Ok(());
            }
        }
    }
}

/// Fills in defaults and canonical ids on a locally authored document.
fn normalize_local(doc: &mut Document) -> StoreResult<DocId> {
    let id = match doc.get(fields::ID) {
        None | Some(Value::Null) => DocId::new(),
        Some(Value::String(text)) if text.is_empty() => DocId::new(),
        Some(Value::String(text)) => DocId::canonicalize(text),
        Some(_) => return Err(StoreError::invalid_document("id must be a string")),
    };
    doc.set_id(id);

    let parent = match doc.get(fields::PARENT) {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) if text.is_empty() => None,
        Some(Value::String(text)) => Some(DocId::canonicalize(text)),
        Some(Value::Object(map)) => match map.get(fields::ID).and_then(Value::as_str) {
            Some(text) => Some(DocId::canonicalize(text)),
            None => return Err(StoreError::invalid_document("parent object has no id")),
        },
        Some(_) => return Err(StoreError::invalid_document("parent must be an id")),
    };
    doc.set_parent(parent);
    if parent == Some(id) {
        return Err(StoreError::ReferenceCycle { id: id.to_string() });
    }

    match doc.get(fields::TIME) {
        None | Some(Value::Null) => doc.set_time(now_micros()),
        Some(value) if value.is_number() => {
            if doc.time() == Some(0) {
                doc.set_time(now_micros());
            }
        }
        Some(_) => return Err(StoreError::invalid_document("time must be a number")),
    }
    if !doc.contains(fields::NAME) {
        doc.set(fields::NAME, Value::String(id.to_string()));
    }
    if !doc.contains(fields::TYPE) {
        doc.set_type("");
    }
    Ok(id)
}

/// Checks the reserved fields of a signed record without changing it.
fn validate_signed(doc: &Document) -> StoreResult<DocId> {
    let id = match doc.id() {
        Some(text) if DocId::is_canonical(text) => DocId::parse(text)?,
        _ => return Err(StoreError::invalid_document("signed record has no canonical id")),
    };
    if let Some(parent) = doc.get(fields::PARENT) {
        let ok = match parent {
            Value::String(text) => text.is_empty() || DocId::is_canonical(text),
            Value::Null => true,
            _ => false,
        };
        if !ok {
            return Err(StoreError::invalid_document("signed record has a malformed parent"));
        }
    }
    if doc.time().is_none() {
        return Err(StoreError::invalid_document("signed record has no time"));
    }
    Ok(id)
}

/// An unsigned edit carrying an older `moveTime` cannot move a document
/// back to where it was before a newer move.
fn apply_move_safety(doc: &mut Document, old: &Document) -> StoreResult<()> {
    if old.move_time() <= doc.move_time() {
        return Ok(());
    }
    if old.parent() != doc.parent() {
        let parent = old.parent().map(DocId::parse).transpose()?;
        doc.set_parent(parent);
    }
    doc.set_move_time(old.move_time());
    Ok(())
}
