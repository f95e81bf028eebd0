//! Cross-crate integration test helpers.
//!
//! [`TransactionHarness`] runs generated operation sequences inside
//! transactions and keeps a shadow model of what the collection must
//! contain afterwards.

use crate::fixtures::TestCluster;
use crate::generators::DocumentOperation;
use doctx_core::{
    AttemptError, Collection, TransactionConfig, TransactionFailed, TransactionResult,
    Transactions,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// A test harness for transactional integration testing.
pub struct TransactionHarness {
    /// The cluster under test.
    pub cluster: TestCluster,
    collection: Collection,
    transactions: Transactions,
    model: BTreeMap<String, Value>,
}

impl TransactionHarness {
    /// Creates a harness over an in-memory single-node cluster.
    pub fn new() -> Self {
        Self::with_cluster(TestCluster::memory())
    }

    /// Creates a harness over the given cluster.
    pub fn with_cluster(cluster: TestCluster) -> Self {
        let collection = cluster.collection();
        let transactions = Transactions::create(&cluster, TransactionConfig::default())
            .expect("Failed to create transactions");
        Self {
            cluster,
            collection,
            transactions,
            model: BTreeMap::new(),
        }
    }

    /// The collection operations run against.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Runs `ops` in one transaction.
    ///
    /// Operations that cannot apply to the current state (inserting an
    /// existing key, replacing a missing one) are skipped. Every `Get` is
    /// checked against the transaction's own view. With `abort` the
    /// transaction fails after the last operation and the model is left
    /// unchanged.
    pub fn apply(
        &mut self,
        ops: &[DocumentOperation],
        abort: bool,
    ) -> Result<TransactionResult, TransactionFailed> {
        let collection = &self.collection;
        let mut view = BTreeMap::new();

        let result = self.transactions.run(|ctx| {
            view = self.model.clone();
            for op in ops {
                match op {
                    DocumentOperation::Get { key } => {
                        let found = ctx.get(collection, key)?;
                        assert_eq!(
                            found.as_ref().map(|doc| doc.content()),
                            view.get(key),
                            "transactional read of {key} disagrees with the model"
                        );
                    }
                    DocumentOperation::Insert { key, content } => {
                        if !view.contains_key(key) {
                            ctx.insert(collection, key, content)?;
                            view.insert(key.clone(), content.clone());
                        }
                    }
                    DocumentOperation::Replace { key, content } => {
                        if view.contains_key(key) {
                            let doc = ctx.get_or_error(collection, key)?;
                            ctx.replace(&doc, content)?;
                            view.insert(key.clone(), content.clone());
                        }
                    }
                    DocumentOperation::Remove { key } => {
                        if view.contains_key(key) {
                            let doc = ctx.get_or_error(collection, key)?;
                            ctx.remove(&doc)?;
                            view.remove(key);
                        }
                    }
                }
            }
            if abort {
                return Err(AttemptError::application("aborted by harness"));
            }
            Ok(())
        });

        if result.is_ok() {
            self.model = view;
        }
        result
    }

    /// Verifies the collection holds exactly the modelled documents.
    pub fn verify_all(&self) {
        for (key, expected) in &self.model {
            let actual = self
                .collection
                .get(key)
                .unwrap_or_else(|err| panic!("Failed to get {key}: {err}"));
            assert_eq!(actual.content(), expected, "Document mismatch for {key}");
        }
        let bucket = self.collection.bucket();
        assert_eq!(
            bucket.document_count().expect("Failed to count documents"),
            self.model.len(),
            "Unexpected documents in the bucket"
        );
    }

    /// Number of documents the model expects.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

impl Default for TransactionHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::operation_sequence_strategy;
    use proptest::prelude::*;
    use serde_json::json;

    fn insert(key: &str, content: Value) -> DocumentOperation {
        DocumentOperation::Insert {
            key: key.to_string(),
            content,
        }
    }

    #[test]
    fn test_committed_sequence() {
        let mut harness = TransactionHarness::new();
        harness
            .apply(
                &[
                    insert("a", json!({"v": 1})),
                    insert("b", json!({"v": 2})),
                    DocumentOperation::Get { key: "a".into() },
                    DocumentOperation::Replace {
                        key: "a".into(),
                        content: json!({"v": 3}),
                    },
                    DocumentOperation::Remove { key: "b".into() },
                ],
                false,
            )
            .unwrap();
        assert_eq!(harness.tracked_count(), 1);
        harness.verify_all();
    }

    #[test]
    fn test_aborted_sequence_leaves_nothing() {
        let mut harness = TransactionHarness::new();
        harness.apply(&[insert("a", json!(1))], false).unwrap();
        let err = harness
            .apply(
                &[
                    insert("b", json!(2)),
                    DocumentOperation::Remove { key: "a".into() },
                ],
                true,
            )
            .unwrap_err();
        assert!(err.to_string().contains("aborted by harness"));
        harness.verify_all();
        assert_eq!(harness.tracked_count(), 1);
    }

    #[test]
    fn test_replicated_cluster() {
        let mut harness =
            TransactionHarness::with_cluster(crate::fixtures::scenarios::replicated_cluster());
        let ops: Vec<_> = (0..20).map(|i| insert(&format!("k{i}"), json!(i))).collect();
        harness.apply(&ops, false).unwrap();
        harness.verify_all();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_generated_sequences(
            first in operation_sequence_strategy(4, 12),
            second in operation_sequence_strategy(4, 12),
            abort in any::<bool>(),
        ) {
            let mut harness = TransactionHarness::new();
            harness.apply(&first, false).unwrap();
            harness.verify_all();
            let outcome = harness.apply(&second, abort);
            prop_assert_eq!(outcome.is_err(), abort);
            harness.verify_all();
        }
    }
}
