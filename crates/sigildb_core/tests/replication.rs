//! Replication behavior between stores sharing one keypair.

use proptest::prelude::*;
use sigildb_codec::{json, DocId};
use sigildb_core::{Config, InboundRecord, Lookup, Store, StoreError, BATCH_SIZE};
use sigildb_crypto::{KeyPair, RecordSignature};

fn store(keys: &KeyPair) -> Store {
    Store::open_in_memory(Config::new().keys(keys.clone())).unwrap()
}

/// Copies everything `from` has that `to` lacks, the way a session would.
fn pull(from: &Store, to: &Store) {
    let peer = from.node_id().to_string();
    let mut cursor = to.resume_point(&peer).unwrap();
    loop {
        let batch = from.outbound_batch(cursor, None, BATCH_SIZE).unwrap();
        let Some(high) = batch.high_water else { break };
        let records: Vec<_> = batch
            .records
            .into_iter()
            .map(|r| InboundRecord {
                json: r.json,
                signature: r.signature.unwrap(),
                arrival: r.arrival,
            })
            .collect();
        to.apply_batch(&peer, &records, Some(cursor)).unwrap();
        cursor = high;
    }
}

fn signed(keys: &KeyPair, json: &str) -> String {
    RecordSignature::sign(json, keys.write.as_ref().unwrap()).to_base64()
}

#[test]
fn burned_parent_takes_children_everywhere() {
    let keys = KeyPair::generate();
    let a = store(&keys);
    let b = store(&keys);

    a.set_document(json!({"id": "a", "type": "post", "time": 100})).unwrap();
    a.set_document(json!({"id": "b", "type": "post", "time": 101, "parent": "a"})).unwrap();
    a.commit().unwrap();
    pull(&a, &b);
    assert!(b.get_document_by_id("b").unwrap().is_some());

    a.set_document(json!({"id": "a", "type": "null", "burn": true, "time": 200}))
        .unwrap();
    a.commit().unwrap();

    let tomb = a.get_document("a", Lookup::AllowOrphans).unwrap().unwrap();
    assert!(tomb.is_tombstone());
    assert!(a.get_document_by_id("b").unwrap().is_none());
    let child = a.get_record_by_id("b").unwrap().unwrap();
    assert!(child.json.contains(r#""type":"null""#));

    pull(&a, &b);
    let child = b.get_document("b", Lookup::AllowOrphans).unwrap().unwrap();
    assert!(child.is_tombstone());
    assert_eq!(a.state_digest().unwrap().digest, b.state_digest().unwrap().digest);
}

#[test]
fn remote_delete_only_reaches_direct_children() {
    let keys = KeyPair::generate();
    let a = store(&keys);
    let b = store(&keys);

    a.set_document(json!({"id": "root", "type": "dir", "time": 10})).unwrap();
    a.set_document(json!({"id": "child", "type": "dir", "time": 11, "parent": "root"})).unwrap();
    a.set_document(json!({"id": "leaf", "type": "file", "time": 12, "parent": "child"})).unwrap();
    a.commit().unwrap();
    pull(&a, &b);

    a.delete_document("root", false).unwrap();
    a.commit().unwrap();
    assert!(a.get_record_by_id("child").unwrap().is_none());
    assert!(a.get_record_by_id("leaf").unwrap().is_none());

    pull(&a, &b);
    assert!(b.get_record_by_id("child").unwrap().is_none());
    assert!(b.get_record_by_id("leaf").unwrap().is_some());
    assert!(b.get_document_by_id("leaf").unwrap().is_none());
}

#[test]
fn applying_a_record_twice_changes_nothing() {
    let keys = KeyPair::generate();
    let target = store(&keys);
    let changes = target.subscribe_records();

    let id = DocId::new();
    let text = format!(r#"{{"id":"{id}","time":5,"type":"post"}}"#);
    let sig = signed(&keys, &text);

    target.apply_record(&text, &sig, Some("peer")).unwrap();
    target.commit().unwrap();
    let first = target.state_digest().unwrap();
    target.apply_record(&text, &sig, Some("peer")).unwrap();
    target.commit().unwrap();

    assert_eq!(target.state_digest().unwrap(), first);
    assert_eq!(changes.try_iter().count(), 1);
}

#[test]
fn records_from_other_keys_are_rejected() {
    let ours = KeyPair::generate();
    let theirs = KeyPair::generate();
    let target = store(&ours);

    let text = format!(r#"{{"id":"{}","time":5,"type":"post"}}"#, DocId::new());
    let err = target
        .apply_record(&text, &signed(&theirs, &text), Some("peer"))
        .unwrap_err();
    assert!(matches!(err, StoreError::Crypto(_)));

    let tampered = text.replace("post", "spam");
    let err = target
        .apply_record(&tampered, &signed(&ours, &text), Some("peer"))
        .unwrap_err();
    assert!(matches!(err, StoreError::Crypto(_)));
}

#[test]
fn older_move_does_not_undo_newer_one() {
    let keys = KeyPair::generate();
    let store = store(&keys);
    store.set_document(json!({"id": "p1", "type": "dir", "time": 1})).unwrap();
    store.set_document(json!({"id": "p2", "type": "dir", "time": 1})).unwrap();
    store
        .set_document(json!({"id": "doc", "type": "file", "time": 2, "parent": "p2", "moveTime": 50}))
        .unwrap();
    store
        .set_document(json!({"id": "doc", "type": "file", "time": 3, "parent": "p1", "moveTime": 20}))
        .unwrap();

    let doc = store.get_document_by_id("doc").unwrap().unwrap();
    assert_eq!(doc.parent(), Some(DocId::from_seed("p2").to_string().as_str()));
    assert_eq!(doc.move_time(), 50);
    assert_eq!(doc.time(), Some(3));
}

#[test]
fn autoclean_channel_is_fixed_once_set() {
    let store = store(&KeyPair::generate());
    store
        .set_document(json!({"id": "m", "type": "msg", "time": 1, "autoclean": "chat"}))
        .unwrap();
    let err = store
        .set_document(json!({"id": "m", "type": "msg", "time": 2, "autoclean": "other"}))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidDocument { .. }));
}

#[test]
fn retention_purges_old_channel_members() {
    let store = Store::open_in_memory(
        Config::new()
            .keys(KeyPair::generate())
            .autoclean_days(1.0)
            .autoclean_probability(1.0),
    )
    .unwrap();
    store
        .set_document(json!({"id": "old", "type": "msg", "time": 1000, "autoclean": "chat"}))
        .unwrap();
    store
        .set_document(json!({"id": "other", "type": "msg", "time": 1000, "autoclean": "logs"}))
        .unwrap();
    store
        .set_document(json!({"id": "new", "type": "msg", "autoclean": "chat"}))
        .unwrap();

    assert!(store.get_record_by_id("old").unwrap().is_none());
    assert!(store.get_record_by_id("other").unwrap().is_some());
    assert!(store.get_record_by_id("new").unwrap().is_some());
}

#[test]
fn gap_in_batches_keeps_peer_range() {
    let store = store(&KeyPair::generate());
    store.record_peer_batch("p", 1, 100).unwrap();
    store.record_peer_batch("p", 500, 900).unwrap();
    let peer = store.peer("p").unwrap().unwrap();
    assert_eq!(peer.last_arrival, 100);
    assert_eq!(peer.horizon, 1);
}

#[test]
fn relayed_records_notify_once() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("shared.db");
    let open = || Store::open_with_config(&path, Config::new().node_secret([7; 32])).unwrap();
    let writer = open();
    let relay = open();
    let changes = relay.subscribe_records();

    let id = writer.set_document(json!({"type": "note", "title": "shared"})).unwrap();
    writer.commit().unwrap();
    let stored = writer.get_record_by_id(&id.to_string()).unwrap().unwrap();
    let record = InboundRecord {
        json: stored.json,
        signature: stored.signature.unwrap(),
        arrival: stored.arrival,
    };

    relay.relay_records(std::slice::from_ref(&record)).unwrap();
    relay.relay_records(&[record]).unwrap();
    relay.scan_for_direct_changes().unwrap();

    let id = id.to_string();
    let delivered = changes
        .try_iter()
        .filter(|change| change.document.id() == Some(id.as_str()))
        .count();
    assert_eq!(delivered, 1);
}

#[test]
fn local_writes_outrun_a_future_arrival() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("skewed.db");
    let store = Store::open_with_config(&path, Config::new().node_secret([7; 32])).unwrap();

    // A row stamped a year ahead, as left by a node whose clock later fell back.
    let future = sigildb_core::now_micros() + 365 * 24 * 3600 * 1_000_000;
    let other = sigildb_storage::Database::open(&path).unwrap();
    other
        .insert_record(&sigildb_core::StoredRecord {
            json: format!(r#"{{"id":"{}","time":1,"type":"note"}}"#, DocId::new()),
            signature: None,
            arrival: future,
            received_from: None,
        })
        .unwrap();
    other.commit().unwrap();
    drop(other);

    let mut last = future;
    for n in 0..3 {
        let id = store.set_document(json!({"type": "note", "n": n})).unwrap();
        let arrival = store.get_record_by_id(&id.to_string()).unwrap().unwrap().arrival;
        assert!(arrival > last);
        last = arrival;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn newest_time_wins_in_any_order(t1 in -1_000_000i64..1_000_000, t2 in -1_000_000i64..1_000_000) {
        prop_assume!(t1 != t2);
        let keys = KeyPair::generate();
        let id = DocId::new();
        let versions: Vec<(String, String)> = [t1, t2]
            .iter()
            .map(|t| {
                let text = format!(r#"{{"id":"{id}","time":{t},"type":"post"}}"#);
                let sig = signed(&keys, &text);
                (text, sig)
            })
            .collect();

        let forward = store(&keys);
        let backward = store(&keys);
        for (text, sig) in &versions {
            forward.apply_record(text, sig, Some("peer")).unwrap();
        }
        for (text, sig) in versions.iter().rev() {
            backward.apply_record(text, sig, Some("peer")).unwrap();
        }

        let winner = t1.max(t2);
        for replica in [&forward, &backward] {
            let doc = replica.get_document_by_id(&id.to_string()).unwrap().unwrap();
            prop_assert_eq!(doc.time(), Some(winner));
        }
    }

    #[test]
    fn arrivals_strictly_increase(count in 1usize..40) {
        let store = store(&KeyPair::generate());
        let mut last = i64::MIN;
        for n in 0..count {
            let id = store.set_document(json!({"type": "tick", "n": n})).unwrap();
            let arrival = store.get_record_by_id(&id.to_string()).unwrap().unwrap().arrival;
            prop_assert!(arrival > last);
            last = arrival;
        }
    }
}
