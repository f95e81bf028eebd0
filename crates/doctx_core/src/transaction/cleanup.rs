//! Lost-transaction cleanup.
//!
//! An attempt that dies between staging and finishing leaves its
//! transaction record behind. Cleanup drives each record to its end state:
//! committed records are unstaged, aborted and expired pending records are
//! rolled back, and finished leftovers are deleted.

use crate::cluster::{Bucket, Cluster};
use crate::durability::DurabilityLevel;
use crate::error::CoreResult;
use crate::transaction::atr::{self, AtrRecord};
use crate::transaction::staging;
use crate::transaction::state::AttemptState;
use crate::types::now_millis;
use std::fmt;
use tracing::{debug, info, warn};

/// What a cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Records examined.
    pub scanned: usize,
    /// Committed attempts whose unstaging was finished.
    pub completed: usize,
    /// Aborted or expired attempts that were rolled back.
    pub rolled_back: usize,
    /// Finished records that were only deleted.
    pub removed: usize,
    /// Pending attempts still within their expiry, left alone.
    pub active: usize,
    /// Records that could not be resolved this time.
    pub failed: usize,
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned {}, completed {}, rolled back {}, removed {}, active {}, failed {}",
            self.scanned, self.completed, self.rolled_back, self.removed, self.active, self.failed
        )
    }
}

pub(crate) fn cleanup_bucket(
    cluster: &Cluster,
    bucket: &Bucket,
    level: DurabilityLevel,
) -> CoreResult<CleanupReport> {
    let mut report = CleanupReport::default();
    let now = now_millis();

    for (key, record) in atr::scan(bucket)? {
        report.scanned += 1;
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!("skipping unreadable transaction record {key}: {err}");
                report.failed += 1;
                continue;
            }
        };

        let outcome = match record.state {
            AttemptState::Committed => {
                resolve(cluster, bucket, &record, level, true).map(|()| report.completed += 1)
            }
            AttemptState::Aborted => {
                resolve(cluster, bucket, &record, level, false).map(|()| report.rolled_back += 1)
            }
            AttemptState::Pending if record.is_expired(now) => {
                let mut aborted = record.clone();
                aborted.state = AttemptState::Aborted;
                atr::write(bucket, &aborted, level, &[AttemptState::Pending])
                    .and_then(|()| resolve(cluster, bucket, &aborted, level, false))
                    .map(|()| report.rolled_back += 1)
            }
            AttemptState::Pending => {
                report.active += 1;
                Ok(())
            }
            AttemptState::NotStarted | AttemptState::Completed | AttemptState::RolledBack => {
                atr::delete(bucket, &key, level).map(|()| report.removed += 1)
            }
        };

        if let Err(err) = outcome {
            warn!("cleanup of transaction record {key} failed: {err}");
            report.failed += 1;
        }
    }

    info!("cleanup of bucket {}: {report}", bucket.name());
    Ok(report)
}

fn resolve(
    cluster: &Cluster,
    bucket: &Bucket,
    record: &AtrRecord,
    level: DurabilityLevel,
    commit: bool,
) -> CoreResult<()> {
    for mutation in &record.mutations {
        let target = cluster.bucket(&mutation.bucket)?;
        let touched = if commit {
            staging::commit_document(&target, &mutation.doc, record.attempt_id, level)?
        } else {
            staging::rollback_document(&target, &mutation.doc, record.attempt_id, level)?
        };
        if touched {
            debug!(
                "{} {} for attempt {}",
                if commit { "unstaged" } else { "rolled back" },
                mutation.doc,
                record.attempt_id
            );
        }
    }
    atr::delete(bucket, &record.key(), level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{AtrLocation, StagedMutation, StagedOp, StoredDocument};
    use crate::config::{RetryPolicy, TransactionConfig};
    use crate::error::CoreError;
    use crate::transaction::atr::AtrMutation;
    use crate::transaction::{AttemptError, FailureKind, Transactions};
    use crate::types::{AttemptId, DocumentRef, TransactionId};
    use serde_json::{json, Value};
    use std::time::Duration;

    /// Leaves behind what an attempt that died at `state` would: a record
    /// and staged changes on `acc1` (replace) and `acc2` (insert).
    fn abandon(bucket: &Bucket, state: AttemptState, expires_in_ms: u64) -> AttemptId {
        let attempt = AttemptId::new();
        let transaction = TransactionId::new();
        let now = now_millis();
        let docs = [
            (
                DocumentRef::new("_default", "acc1"),
                StagedOp::Replace {
                    content: json!({"followups": 2}),
                },
            ),
            (
                DocumentRef::new("_default", "acc2"),
                StagedOp::Insert {
                    content: json!({"followups": 1}),
                },
            ),
        ];
        let record = AtrRecord {
            transaction_id: transaction,
            attempt_id: attempt,
            state,
            started_at_ms: now,
            expires_at_ms: now + expires_in_ms,
            mutations: docs
                .iter()
                .map(|(doc, _)| AtrMutation {
                    bucket: bucket.name().to_string(),
                    doc: doc.clone(),
                })
                .collect(),
        };
        atr::write(bucket, &record, DurabilityLevel::None, &[]).unwrap();

        for (doc, op) in docs {
            bucket
                .mutate(&doc, DurabilityLevel::None, |current, cas| {
                    Ok(Some(StoredDocument {
                        body: current.and_then(|c| c.body.clone()),
                        cas,
                        staged: Some(StagedMutation {
                            transaction_id: transaction,
                            attempt_id: attempt,
                            atr: AtrLocation::for_attempt(bucket.name(), attempt),
                            op,
                        }),
                    }))
                })
                .unwrap();
        }
        attempt
    }

    fn setup() -> (Cluster, Bucket) {
        let cluster = Cluster::open_in_memory().unwrap();
        let bucket = cluster.bucket("test").unwrap();
        bucket
            .default_collection()
            .insert("acc1", &json!({"followups": 1}))
            .unwrap();
        (cluster, bucket)
    }

    fn body(bucket: &Bucket, key: &str) -> Option<Value> {
        bucket
            .read(&DocumentRef::new("_default", key))
            .unwrap()
            .and_then(|d| d.body)
    }

    #[test]
    fn committed_record_is_finished() {
        let (cluster, bucket) = setup();
        abandon(&bucket, AttemptState::Committed, 60_000);

        // plain reads still see the old body, transactional reads the new one
        assert_eq!(body(&bucket, "acc1"), Some(json!({"followups": 1})));
        let transactions = Transactions::create(&cluster, TransactionConfig::default()).unwrap();
        let collection = bucket.default_collection();
        transactions
            .run(|ctx| {
                let doc = ctx.get_or_error(&collection, "acc1")?;
                assert_eq!(doc.content()["followups"], 2);
                assert!(ctx.get(&collection, "acc2")?.is_some());
                Ok(())
            })
            .unwrap();

        let report = transactions.cleanup_lost(&bucket).unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.scanned, 1);
        assert_eq!(body(&bucket, "acc1"), Some(json!({"followups": 2})));
        assert_eq!(body(&bucket, "acc2"), Some(json!({"followups": 1})));
        assert!(atr::scan(&bucket).unwrap().is_empty());
        assert!(bucket
            .read(&DocumentRef::new("_default", "acc1"))
            .unwrap()
            .unwrap()
            .staged
            .is_none());
    }

    #[test]
    fn expired_pending_record_is_rolled_back() {
        let (cluster, bucket) = setup();
        abandon(&bucket, AttemptState::Pending, 0);

        let report = cleanup_bucket(&cluster, &bucket, DurabilityLevel::None).unwrap();
        assert_eq!(report.rolled_back, 1);
        assert_eq!(body(&bucket, "acc1"), Some(json!({"followups": 1})));
        assert!(bucket
            .read(&DocumentRef::new("_default", "acc2"))
            .unwrap()
            .is_none());
        assert!(atr::scan(&bucket).unwrap().is_empty());

        // plain writes are unlocked again
        bucket
            .default_collection()
            .upsert("acc1", &json!({"followups": 7}))
            .unwrap();
    }

    #[test]
    fn live_pending_record_is_left_alone() {
        let (cluster, bucket) = setup();
        abandon(&bucket, AttemptState::Pending, 60_000);

        let report = cleanup_bucket(&cluster, &bucket, DurabilityLevel::None).unwrap();
        assert_eq!(report.active, 1);
        assert_eq!(report.rolled_back, 0);
        assert!(matches!(
            bucket.default_collection().upsert("acc1", &json!({})),
            Err(CoreError::DocumentLocked { .. })
        ));
    }

    #[test]
    fn live_staging_blocks_other_transactions_until_expiry() {
        let (cluster, bucket) = setup();
        abandon(&bucket, AttemptState::Pending, 60_000);

        let config = TransactionConfig::default()
            .durability_level(DurabilityLevel::None)
            .expiration(Duration::from_millis(100))
            .retry(RetryPolicy::default().with_initial_delay(Duration::from_millis(5)));
        let transactions = Transactions::create(&cluster, config).unwrap();
        let collection = bucket.default_collection();
        let err = transactions
            .run(|ctx| {
                let doc = ctx.get_or_error(&collection, "acc1")?;
                ctx.replace(&doc, &json!({"followups": 9}))?;
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Expired);
        assert!(err.result.attempts.len() > 1);
        assert!(matches!(
            err.cause,
            AttemptError::Core(CoreError::WriteWriteConflict { .. }) | AttemptError::Expired
        ));
    }

    #[test]
    fn stale_staging_is_overwritten() {
        let (cluster, bucket) = setup();
        abandon(&bucket, AttemptState::Pending, 0);

        let transactions = Transactions::create(
            &cluster,
            TransactionConfig::default().durability_level(DurabilityLevel::None),
        )
        .unwrap();
        let collection = bucket.default_collection();
        transactions
            .run(|ctx| {
                let doc = ctx.get_or_error(&collection, "acc1")?;
                assert_eq!(doc.content()["followups"], 1);
                ctx.replace(&doc, &json!({"followups": 5}))?;
                // the abandoned insert is invisible and may be claimed
                assert!(ctx.get(&collection, "acc2")?.is_none());
                ctx.insert(&collection, "acc2", &json!({"followups": 0}))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(body(&bucket, "acc1"), Some(json!({"followups": 5})));
        assert_eq!(body(&bucket, "acc2"), Some(json!({"followups": 0})));

        // the dead attempt's record is still there; cleanup retires it
        // without touching the documents
        let report = transactions.cleanup_lost(&bucket).unwrap();
        assert_eq!(report.rolled_back, 1);
        assert_eq!(body(&bucket, "acc1"), Some(json!({"followups": 5})));
    }

    #[test]
    fn finished_leftovers_are_removed() {
        let (cluster, bucket) = setup();
        let now = now_millis();
        let record = AtrRecord {
            transaction_id: TransactionId::new(),
            attempt_id: AttemptId::new(),
            state: AttemptState::Completed,
            started_at_ms: now,
            expires_at_ms: now,
            mutations: Vec::new(),
        };
        atr::write(&bucket, &record, DurabilityLevel::None, &[]).unwrap();
        let report = cleanup_bucket(&cluster, &bucket, DurabilityLevel::None).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.to_string(), "scanned 1, completed 0, rolled back 0, removed 1, active 0, failed 0");
    }
}
