//! Store operations used by sync sessions.

use crate::error::{StoreError, StoreResult};
use crate::events::CommitNotice;
use crate::store::Store;
use sigildb_codec::Document;
use sigildb_crypto::{hash, is_current, RecordSignature, HASH_LEN};
use sigildb_storage::{PeerRow, StoredRecord};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Default number of records per outbound batch.
pub const BATCH_SIZE: usize = 100;

/// Records a session should send, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundBatch {
    /// Rows to send.
    pub records: Vec<StoredRecord>,
    /// Highest arrival scanned, including rows that were skipped.
    pub high_water: Option<i64>,
}

/// A record received from a peer: `[json, signature, arrival]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    /// Exact JSON text.
    pub json: String,
    /// Base64 record signature.
    pub signature: String,
    /// The sender's arrival for this record.
    pub arrival: i64,
}

/// What happened to an inbound batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records that went through the write pipeline.
    pub applied: usize,
    /// Records rejected individually.
    pub rejected: usize,
    /// Highest sender arrival in the batch.
    pub latest: Option<i64>,
}

/// Summary of a replica's contents.
///
/// Two replicas holding the same records have equal digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateDigest {
    /// XOR of the hash of every stored signature.
    pub digest: [u8; HASH_LEN],
    /// Latest local arrival.
    pub latest_arrival: i64,
}

impl fmt::Display for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.digest {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Store {
    /// Returns the sync bookkeeping for a peer.
    pub fn peer(&self, peer_id: &str) -> StoreResult<Option<PeerRow>> {
        self.with_state(|state| Ok(state.db.peer(peer_id)?))
    }

    /// Returns every known peer.
    pub fn peers(&self) -> StoreResult<Vec<PeerRow>> {
        self.with_state(|state| Ok(state.db.peers()?))
    }

    /// Returns the cursor to request from a peer on a fresh session.
    pub fn resume_point(&self, peer_id: &str) -> StoreResult<i64> {
        Ok(self
            .peer(peer_id)?
            .map_or(1, |peer| peer.last_arrival.max(1)))
    }

    /// Returns up to `limit` rows with arrival after `after`, skipping rows
    /// received from `exclude`.
    ///
    /// Rows signed under a stale key are re-signed when the write key is
    /// held and skipped otherwise.
    pub fn outbound_batch(
        &self,
        after: i64,
        exclude: Option<&str>,
        limit: usize,
    ) -> StoreResult<OutboundBatch> {
        self.with_state(|state| {
            let rows = state.db.arrivals_after(after, exclude, limit)?;
            let high_water = rows.last().map(|row| row.arrival);
            let mut records = Vec::with_capacity(rows.len());
            for mut row in rows {
                let current = row
                    .signature
                    .as_deref()
                    .is_some_and(|sig| is_current(sig, &state.keys.sync));
                if !current {
                    let Some(write) = state.keys.write.as_ref() else {
                        debug!(arrival = row.arrival, "skipping record signed under another key");
                        continue;
                    };
                    let Some(id) = Document::from_json(&row.json)?.id().map(str::to_string) else {
                        continue;
                    };
                    let signature = RecordSignature::sign(&row.json, write).to_base64();
                    state.db.update_signature(&id, &signature)?;
                    debug!(id = %id, "re-signed outbound record");
                    row.signature = Some(signature);
                }
                records.push(row);
            }
            Ok(OutboundBatch {
                records,
                high_water,
            })
        })
    }

    /// Applies a batch from `peer` and updates its bookkeeping.
    ///
    /// Records are rejected one at a time; a storage failure aborts the
    /// batch without touching the peer row. `starts_from` is the cursor the
    /// batch answers, `None` for unsolicited pushes.
    pub fn apply_batch(
        &self,
        peer: &str,
        records: &[InboundRecord],
        starts_from: Option<i64>,
    ) -> StoreResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for record in records {
            outcome.latest = Some(outcome.latest.map_or(record.arrival, |l| l.max(record.arrival)));
            match self.apply_record(&record.json, &record.signature, Some(peer)) {
                Ok(_) => outcome.applied += 1,
                Err(err) if err.is_record_rejection() => {
                    warn!(peer = %peer, arrival = record.arrival, error = %err, "rejected record");
                    outcome.rejected += 1;
                }
                Err(err) => return Err(err),
            }
        }
        if let (Some(start), Some(latest)) = (starts_from, outcome.latest) {
            self.record_peer_batch(peer, start, latest)?;
        }
        self.commit()?;
        Ok(outcome)
    }

    /// Advances a peer's gap-free range after a batch covering
    /// `[start, latest]`.
    ///
    /// `last_arrival` only moves when the batch starts inside the known
    /// range; `horizon` only moves back when the batch reaches it.
    pub fn record_peer_batch(&self, peer: &str, start: i64, latest: i64) -> StoreResult<()> {
        self.with_state(|state| {
            let row = match state.db.peer(peer)? {
                None => PeerRow {
                    peer_id: peer.to_string(),
                    last_arrival: latest,
                    horizon: start,
                    info: None,
                },
                Some(mut row) => {
                    let before = row.clone();
                    if start <= row.last_arrival {
                        row.last_arrival = row.last_arrival.max(latest);
                    }
                    if start < row.horizon && latest >= row.horizon {
                        row.horizon = start;
                    }
                    if row == before {
                        return Ok(());
                    }
                    row
                }
            };
            debug!(peer = %peer, last_arrival = row.last_arrival, horizon = row.horizon, "peer range advanced");
            state.db.upsert_peer(&row)?;
            Ok(())
        })
    }

    /// Relays records that another handle on this store announced: delivers
    /// change notifications and asks other sessions to push from the
    /// earliest of them.
    ///
    /// Notifications share the dispatch cursor with local writes and
    /// [`Store::scan_for_direct_changes`], so each arrival is delivered once.
    pub fn relay_records(&self, records: &[InboundRecord]) -> StoreResult<()> {
        let Some(earliest) = records.iter().map(|r| r.arrival).min() else {
            return Ok(());
        };
        let mut ordered: Vec<&InboundRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.arrival);
        self.with_state(|state| {
            for record in ordered {
                state.dispatch(&StoredRecord {
                    json: record.json.clone(),
                    signature: Some(record.signature.clone()),
                    arrival: record.arrival,
                    received_from: None,
                });
            }
            Ok(())
        })?;
        self.shared.commits.emit(&CommitNotice {
            send_after: Some(earliest - 1),
        });
        Ok(())
    }

    /// Returns peer address to last-contact time, `-1` when disconnected.
    #[must_use]
    pub fn connected_servers(&self) -> BTreeMap<String, i64> {
        self.shared.connected_servers.lock().clone()
    }

    /// Records the last contact with a server.
    pub fn mark_server(&self, address: &str, last_seen: i64) {
        self.shared
            .connected_servers
            .lock()
            .insert(address.to_string(), last_seen);
    }

    /// Merges a map reported by another handle on this store.
    pub fn merge_connected_servers(&self, servers: &BTreeMap<String, i64>) {
        let mut ours = self.shared.connected_servers.lock();
        for (address, last_seen) in servers {
            let entry = ours.entry(address.clone()).or_insert(*last_seen);
            *entry = (*entry).max(*last_seen);
        }
    }

    /// Returns the proof of write-key possession, `None` without the key.
    pub fn write_proof(&self) -> StoreResult<Option<[u8; HASH_LEN]>> {
        self.with_state(|state| Ok(state.keys.write.as_ref().map(|w| w.password_proof())))
    }

    /// Returns true if `proof` matches this store's write key.
    pub fn write_proof_matches(&self, proof: &[u8]) -> StoreResult<bool> {
        Ok(self
            .write_proof()?
            .is_some_and(|ours| ours.as_slice() == proof))
    }

    /// Applies documents a peer asked us to write on its behalf.
    ///
    /// Signed entries go through verification; unsigned ones are authored
    /// with our write key.
    pub fn insert_documents(&self, documents: &[(String, Option<String>)]) -> StoreResult<usize> {
        let mut applied = 0;
        for (json, signature) in documents {
            let result = match signature {
                Some(signature) => self.apply_record(json, signature, None),
                None => Document::from_json(json)
                    .map_err(StoreError::from)
                    .and_then(|doc| self.set_document(doc)),
            };
            match result {
                Ok(_) => applied += 1,
                Err(err) if err.is_record_rejection() => {
                    warn!(error = %err, "rejected privileged insert");
                }
                Err(err) => return Err(err),
            }
        }
        self.commit()?;
        Ok(applied)
    }

    /// Computes the state digest.
    pub fn state_digest(&self) -> StoreResult<StateDigest> {
        self.with_state(|state| {
            let mut digest = [0u8; HASH_LEN];
            state.db.for_each_signature(|signature| {
                for (out, byte) in digest.iter_mut().zip(hash(signature.as_bytes())) {
                    *out ^= byte;
                }
            })?;
            Ok(StateDigest {
                digest,
                latest_arrival: state.db.max_arrival()?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use sigildb_codec::json;
    use sigildb_crypto::KeyPair;

    fn store_with(keys: &KeyPair) -> Store {
        Store::open_in_memory(Config::new().keys(keys.clone())).unwrap()
    }

    fn inbound(rows: Vec<StoredRecord>) -> Vec<InboundRecord> {
        rows.into_iter()
            .map(|r| InboundRecord {
                json: r.json,
                signature: r.signature.unwrap_or_default(),
                arrival: r.arrival,
            })
            .collect()
    }

    #[test]
    fn new_peer_takes_batch_range() {
        let store = store_with(&KeyPair::generate());
        store.record_peer_batch("p", 5, 10).unwrap();
        let row = store.peer("p").unwrap().unwrap();
        assert_eq!((row.last_arrival, row.horizon), (10, 5));
    }

    #[test]
    fn gap_does_not_advance_last_arrival() {
        let store = store_with(&KeyPair::generate());
        store.record_peer_batch("p", 5, 10).unwrap();
        store.record_peer_batch("p", 20, 30).unwrap();
        let row = store.peer("p").unwrap().unwrap();
        assert_eq!((row.last_arrival, row.horizon), (10, 5));

        store.record_peer_batch("p", 10, 30).unwrap();
        store.record_peer_batch("p", 1, 6).unwrap();
        let row = store.peer("p").unwrap().unwrap();
        assert_eq!((row.last_arrival, row.horizon), (30, 1));
    }

    #[test]
    fn batch_moves_records_between_replicas() {
        let keys = KeyPair::generate();
        let a = store_with(&keys);
        let b = store_with(&keys);
        a.set_document(json!({"type": "post", "body": "hi"})).unwrap();
        a.commit().unwrap();

        let batch = a.outbound_batch(0, None, BATCH_SIZE).unwrap();
        let outcome = b
            .apply_batch(&a.node_id().to_string(), &inbound(batch.records), Some(0))
            .unwrap();
        assert_eq!(outcome.rejected, 0);
        assert_eq!(a.state_digest().unwrap().digest, b.state_digest().unwrap().digest);
    }

    #[test]
    fn foreign_records_are_rejected_individually() {
        let a = store_with(&KeyPair::generate());
        let b = store_with(&KeyPair::generate());
        a.set_document(json!({"type": "post"})).unwrap();
        a.commit().unwrap();
        let batch = a.outbound_batch(0, None, BATCH_SIZE).unwrap();
        let count = batch.records.len();
        let outcome = b.apply_batch("a", &inbound(batch.records), Some(0)).unwrap();
        assert_eq!(outcome.rejected, count);
        assert!(b.peer("a").unwrap().is_some());
    }

    #[test]
    fn stale_signatures_are_resigned_before_sending() {
        let keys = KeyPair::generate();
        let writer = store_with(&keys);
        writer.set_document(json!({"type": "post"})).unwrap();
        writer.commit().unwrap();
        writer
            .with_state(|s| {
                for row in s.db.arrivals_after(0, None, 10)? {
                    let id = Document::from_json(&row.json)?.id().unwrap_or_default().to_string();
                    s.db.update_signature(&id, "stale")?;
                }
                Ok(())
            })
            .unwrap();
        let batch = writer.outbound_batch(0, None, BATCH_SIZE).unwrap();
        assert!(batch
            .records
            .iter()
            .all(|r| is_current(r.signature.as_deref().unwrap(), &keys.sync)));
        assert!(batch.high_water.is_some());
    }

    #[test]
    fn read_only_replica_skips_stale_signatures() {
        let store = store_with(&KeyPair::read_only(KeyPair::generate().sync));
        store
            .with_state(|s| {
                s.db.insert_record(&StoredRecord {
                    json: r#"{"id":"x","time":1,"type":"post"}"#.into(),
                    signature: Some("stale".into()),
                    arrival: 7,
                    received_from: None,
                })?;
                Ok(())
            })
            .unwrap();
        let batch = store.outbound_batch(0, None, BATCH_SIZE).unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.high_water, Some(7));
    }

    #[test]
    fn write_proof_requires_matching_key() {
        let keys = KeyPair::generate();
        let store = store_with(&keys);
        let proof = keys.write.as_ref().unwrap().password_proof();
        assert!(store.write_proof_matches(&proof).unwrap());
        assert!(!store.write_proof_matches(&[0; 32]).unwrap());
    }

    #[test]
    fn connected_servers_merge_keeps_latest() {
        let store = store_with(&KeyPair::generate());
        store.mark_server("a", 5);
        store.merge_connected_servers(&BTreeMap::from([("a".to_string(), 3), ("b".to_string(), -1)]));
        let servers = store.connected_servers();
        assert_eq!(servers["a"], 5);
        assert_eq!(servers["b"], -1);
    }
}
