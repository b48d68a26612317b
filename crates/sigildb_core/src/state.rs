//! Mutable per-store state, guarded by the store lock.

use crate::clock::now_micros;
use crate::error::StoreResult;
use crate::events::RecordChange;
use sigildb_codec::Document;
use sigildb_crypto::KeyPair;
use sigildb_storage::{Database, StoredRecord};
use std::collections::BTreeMap;
use tracing::warn;

/// Everything a mutation touches.
pub(crate) struct StoreState {
    pub(crate) db: Database,
    pub(crate) keys: KeyPair,
    /// Base64 node id of this replica.
    pub(crate) node_id: String,
    /// Highest arrival already delivered to record subscribers.
    dispatch_cursor: i64,
    /// Highest arrival allocated by this handle.
    last_arrival: i64,
    /// Tombstones written since the last commit, with their origin.
    pub(crate) null_queue: BTreeMap<String, Option<String>>,
    /// Lowest arrival written since the last commit.
    earliest_uncommitted: Option<i64>,
    pub(crate) autoclean_days: f64,
    pub(crate) autoclean_probability: f64,
    /// Changes waiting to be delivered once the state borrow is released.
    pub(crate) pending: Vec<RecordChange>,
}

impl StoreState {
    pub(crate) fn new(
        db: Database,
        keys: KeyPair,
        node_id: String,
        autoclean_days: f64,
        autoclean_probability: f64,
    ) -> StoreResult<Self> {
        let max_arrival = db.max_arrival()?;
        Ok(Self {
            db,
            keys,
            node_id,
            dispatch_cursor: max_arrival,
            last_arrival: max_arrival,
            null_queue: BTreeMap::new(),
            earliest_uncommitted: None,
            autoclean_days,
            autoclean_probability,
            pending: Vec::new(),
        })
    }

    /// Allocates the arrival for a new row: `max(highest + 1, now)`.
    pub(crate) fn next_arrival(&mut self) -> StoreResult<i64> {
        let highest = self.db.max_arrival()?.max(self.last_arrival);
        let arrival = highest.saturating_add(1).max(now_micros());
        self.last_arrival = arrival;
        self.earliest_uncommitted = Some(
            self.earliest_uncommitted
                .map_or(arrival, |earliest| earliest.min(arrival)),
        );
        Ok(arrival)
    }

    /// Queues a change notification for `record` unless already delivered.
    pub(crate) fn dispatch(&mut self, record: &StoredRecord) {
        if record.arrival <= self.dispatch_cursor {
            return;
        }
        self.dispatch_cursor = record.arrival;
        match Document::from_json(&record.json) {
            Ok(document) => self.pending.push(RecordChange {
                document,
                signature: record.signature.clone(),
                arrival: record.arrival,
                received_from: record.received_from.clone(),
            }),
            Err(err) => warn!(arrival = record.arrival, error = %err, "stored record is not a document"),
        }
    }

    /// Dispatches every row that arrived past the cursor, e.g. written by
    /// another process sharing the file.
    pub(crate) fn scan_for_direct_changes(&mut self) -> StoreResult<usize> {
        let mut delivered = 0;
        loop {
            let rows = self.db.arrivals_after(self.dispatch_cursor, None, 100)?;
            if rows.is_empty() {
                return Ok(delivered);
            }
            for row in &rows {
                self.last_arrival = self.last_arrival.max(row.arrival);
                self.dispatch(row);
                delivered += 1;
            }
        }
    }

    /// Drains deletion propagation and commits.
    ///
    /// Returns the lowest arrival written since the previous commit.
    pub(crate) fn commit(&mut self) -> StoreResult<Option<i64>> {
        // Entries leave the queue only once propagated.
        while let Some((id, received_from)) = self
            .null_queue
            .first_key_value()
            .map(|(id, from)| (id.clone(), from.clone()))
        {
            self.propagate_from(&id, received_from.as_deref())?;
            self.null_queue.remove(&id);
        }
        self.db.commit()?;
        Ok(self.earliest_uncommitted.take())
    }

    /// Loads the stored document for `id`.
    pub(crate) fn load(&self, id: &str) -> StoreResult<Option<(StoredRecord, Document)>> {
        match self.db.record(id)? {
            Some(record) => {
                let doc = Document::from_json(&record.json)?;
                Ok(Some((record, doc)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> StoreState {
        let db = Database::open_in_memory().unwrap();
        StoreState::new(db, KeyPair::generate(), "node".into(), 0.0, 0.0).unwrap()
    }

    #[test]
    fn arrivals_strictly_increase() {
        let mut state = state();
        let first = state.next_arrival().unwrap();
        let second = state.next_arrival().unwrap();
        assert!(second > first);
        assert!(first >= now_micros() - 60_000_000);
    }

    #[test]
    fn commit_reports_earliest_uncommitted() {
        let mut state = state();
        assert_eq!(state.commit().unwrap(), None);
        let first = state.next_arrival().unwrap();
        state.next_arrival().unwrap();
        assert_eq!(state.commit().unwrap(), Some(first));
        assert_eq!(state.commit().unwrap(), None);
    }

    #[test]
    fn arrivals_stay_ahead_of_a_future_row() {
        let mut state = state();
        let future = now_micros() + 365 * 24 * 3600 * 1_000_000;
        state
            .db
            .insert_record(&StoredRecord {
                json: r#"{"id":"ahead","time":1,"type":"t"}"#.into(),
                signature: None,
                arrival: future,
                received_from: None,
            })
            .unwrap();

        let first = state.next_arrival().unwrap();
        assert_eq!(first, future + 1);
        let second = state.next_arrival().unwrap();
        assert!(second > first);
    }

    #[test]
    fn failed_propagation_keeps_the_tombstone_queued() {
        let mut state = state();
        // Valid for SQLite, out of range for the document parser.
        state
            .db
            .insert_record(&StoredRecord {
                json: r#"{"id":"broken","time":1e999,"type":"t"}"#.into(),
                signature: None,
                arrival: 1,
                received_from: None,
            })
            .unwrap();
        state.null_queue.insert("broken".into(), None);

        assert!(state.commit().is_err());
        assert!(state.null_queue.contains_key("broken"));
    }

    #[test]
    fn dispatch_skips_already_seen_arrivals() {
        let mut state = state();
        let record = StoredRecord {
            json: r#"{"id":"x","time":1,"type":"t"}"#.into(),
            signature: None,
            arrival: 10,
            received_from: None,
        };
        state.dispatch(&record);
        state.dispatch(&record);
        assert_eq!(state.pending.len(), 1);
    }
}
