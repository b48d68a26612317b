//! Property-based test generators using proptest.
//!
//! Generated documents only use ids from a small seed pool so that
//! operation sequences hit the same documents repeatedly.

use proptest::prelude::*;
use sigildb_codec::{json, DocId, Value};

/// Strategy for document ids drawn from a pool of `pool` seeds.
pub fn doc_id_strategy(pool: usize) -> impl Strategy<Value = DocId> {
    (0..pool.max(1)).prop_map(|n| DocId::from_seed(&format!("doc-{n}")))
}

/// Strategy for application document types.
pub fn doc_type_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["note", "post", "comment", "task"]).prop_map(str::to_string)
}

/// Strategy for short searchable text.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        1..6,
    )
    .prop_map(|words| words.join(" "))
}

/// Strategy for document times in microseconds.
pub fn time_strategy() -> impl Strategy<Value = i64> {
    1_000_000i64..2_000_000_000_000_000
}

/// Strategy for a document with an id from `pool` seeds.
pub fn document_strategy(pool: usize) -> impl Strategy<Value = Value> {
    (
        doc_id_strategy(pool),
        doc_type_strategy(),
        text_strategy(),
        text_strategy(),
        time_strategy(),
    )
        .prop_map(|(id, doc_type, title, body, time)| {
            json!({
                "id": id.to_string(),
                "type": doc_type,
                "title": title,
                "body": body,
                "time": time,
            })
        })
}

/// A local mutation against a store.
#[derive(Debug, Clone)]
pub enum DocOperation {
    /// Write a document.
    Put {
        /// The document.
        doc: Value,
    },
    /// Delete a document.
    Delete {
        /// Target id.
        id: DocId,
        /// Whether to burn the subtree.
        burn: bool,
    },
}

/// Strategy for one operation over ids from `pool` seeds.
pub fn doc_operation_strategy(pool: usize) -> impl Strategy<Value = DocOperation> {
    prop_oneof![
        4 => document_strategy(pool).prop_map(|doc| DocOperation::Put { doc }),
        1 => (doc_id_strategy(pool), any::<bool>())
            .prop_map(|(id, burn)| DocOperation::Delete { id, burn }),
    ]
}

/// Strategy for a sequence of operations.
pub fn operation_sequence_strategy(
    pool: usize,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<DocOperation>> {
    prop::collection::vec(doc_operation_strategy(pool), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    ///
    /// Store-backed properties open SQLite per case, so this is the usual
    /// choice for them.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigildb_codec::Document;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn ids_come_from_the_pool(id in doc_id_strategy(3)) {
            let pool: Vec<_> = (0..3).map(|n| DocId::from_seed(&format!("doc-{n}"))).collect();
            prop_assert!(pool.contains(&id));
        }

        #[test]
        fn documents_parse(doc in document_strategy(8)) {
            let parsed = Document::from_value(doc).unwrap();
            prop_assert!(!parsed.is_tombstone());
            prop_assert!(parsed.time().is_some());
        }
    }
}
