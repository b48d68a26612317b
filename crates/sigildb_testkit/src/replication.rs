//! In-process replication helpers.
//!
//! [`pull`] moves records between two stores through the same store calls
//! a sync session makes, without envelopes or sockets. Async helpers poll
//! for conditions reached by real sessions.

use crate::generators::DocOperation;
use sigildb_core::{InboundRecord, Store, StoreResult, BATCH_SIZE};
use std::future::Future;
use std::time::Duration;

/// Copies everything `from` has that `to` lacks, batch by batch.
///
/// Returns the number of records applied.
pub fn pull(from: &Store, to: &Store) -> StoreResult<usize> {
    let peer = from.node_id().to_string();
    let mut cursor = to.resume_point(&peer)?;
    let mut applied = 0;
    loop {
        let batch = from.outbound_batch(cursor, Some(&to.node_id().to_string()), BATCH_SIZE)?;
        let Some(high) = batch.high_water else {
            return Ok(applied);
        };
        let records: Vec<_> = batch
            .records
            .into_iter()
            .filter_map(|r| {
                Some(InboundRecord {
                    json: r.json,
                    signature: r.signature?,
                    arrival: r.arrival,
                })
            })
            .collect();
        applied += to.apply_batch(&peer, &records, Some(cursor))?.applied;
        cursor = high;
    }
}

/// Pulls in both directions.
///
/// # Panics
///
/// Panics if either store fails.
pub fn converge(a: &Store, b: &Store) {
    pull(a, b).expect("Failed to pull a into b");
    pull(b, a).expect("Failed to pull b into a");
}

/// Asserts that two replicas hold the same records.
///
/// # Panics
///
/// Panics if the digests differ.
pub fn assert_converged(a: &Store, b: &Store) {
    let left = a.state_digest().expect("Failed to digest a");
    let right = b.state_digest().expect("Failed to digest b");
    assert_eq!(left.digest, right.digest, "replicas diverged: {left} vs {right}");
}

/// Applies generated operations locally and commits.
///
/// Individual operations may fail (deleting an unknown id is fine); the
/// number that succeeded is returned.
///
/// # Panics
///
/// Panics if the commit fails.
pub fn apply_operations(store: &Store, ops: &[DocOperation]) -> usize {
    let mut ok = 0;
    for op in ops {
        let result = match op {
            DocOperation::Put { doc } => store.set_document(doc.clone()).map(drop),
            DocOperation::Delete { id, burn } => store.delete_document(&id.to_string(), *burn).map(drop),
        };
        if result.is_ok() {
            ok += 1;
        }
    }
    store.commit().expect("Failed to commit");
    ok
}

/// Polls `condition` every 20 ms until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Waits until `store` holds a live document with `id`.
pub async fn wait_for_document(store: &Store, id: &str, timeout: Duration) -> bool {
    eventually(timeout, || matches!(store.get_document_by_id(id), Ok(Some(_)))).await
}

/// Waits until two replicas hold the same records.
pub async fn wait_converged(a: &Store, b: &Store, timeout: Duration) -> bool {
    eventually(timeout, || match (a.state_digest(), b.state_digest()) {
        (Ok(left), Ok(right)) => left.digest == right.digest,
        _ => false,
    })
    .await
}

/// Runs `future` with a timeout, panicking if it does not finish.
///
/// # Panics
///
/// Panics on timeout.
pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future)
        .await
        .expect("Timed out")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::paired_stores;
    use crate::generators::{operation_sequence_strategy, PropTestConfig};
    use proptest::prelude::*;
    use sigildb_codec::json;

    #[test]
    fn pull_copies_and_resumes() {
        let (a, b) = paired_stores();
        let id = a.set_document(json!({"type": "note", "title": "one"})).unwrap();
        a.commit().unwrap();

        assert!(pull(&a, &b).unwrap() > 0);
        assert!(b.get_document_by_id(&id.to_string()).unwrap().is_some());
        assert_eq!(pull(&a, &b).unwrap(), 0);
    }

    #[tokio::test]
    async fn eventually_times_out() {
        assert!(!eventually(Duration::from_millis(50), || false).await);
        assert!(eventually(Duration::from_millis(50), || true).await);
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn concurrent_edits_converge(
            left in operation_sequence_strategy(6, 1, 12),
            right in operation_sequence_strategy(6, 1, 12),
        ) {
            let (a, b) = paired_stores();
            apply_operations(&a, &left);
            apply_operations(&b, &right);
            converge(&a, &b);
            converge(&a, &b);
            assert_converged(&a, &b);
        }
    }
}
