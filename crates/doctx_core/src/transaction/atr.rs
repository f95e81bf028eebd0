//! Active transaction records.
//!
//! Each attempt that stages anything owns one record, stored as a plain
//! document `_txn/atr::<attempt_id>` in the bucket of its first mutation.
//! Flipping the record to [`AttemptState::Committed`] is the commit point:
//! from then on every reader treats the attempt's stagings as committed.

use crate::cluster::{AtrLocation, Bucket, Cluster, StoredDocument, TXN_COLLECTION};
use crate::durability::DurabilityLevel;
use crate::error::{CoreError, CoreResult};
use crate::transaction::state::AttemptState;
use crate::types::{now_millis, AttemptId, DocumentRef, TransactionId};
use serde::{Deserialize, Serialize};

/// A document an attempt has staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtrMutation {
    /// Bucket of the document.
    pub bucket: String,
    /// The document.
    pub doc: DocumentRef,
}

/// Body of an active transaction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtrRecord {
    /// Owning transaction.
    pub transaction_id: TransactionId,
    /// Owning attempt.
    pub attempt_id: AttemptId,
    /// Current state.
    pub state: AttemptState,
    /// Creation time, epoch millis.
    pub started_at_ms: u64,
    /// After this time a pending attempt is considered lost.
    pub expires_at_ms: u64,
    /// Documents staged by the attempt.
    pub mutations: Vec<AtrMutation>,
}

impl AtrRecord {
    /// Whether a pending attempt has outlived its expiry.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Key of this record in [`TXN_COLLECTION`].
    #[must_use]
    pub fn key(&self) -> String {
        record_key(self.attempt_id)
    }
}

pub(crate) fn record_key(attempt: AttemptId) -> String {
    AtrLocation::for_attempt("", attempt).key
}

fn record_doc(key: &str) -> DocumentRef {
    DocumentRef::new(TXN_COLLECTION, key)
}

/// Reads the record a staging points at. Missing buckets or records yield
/// `None`.
pub(crate) fn load(cluster: &Cluster, location: &AtrLocation) -> CoreResult<Option<AtrRecord>> {
    let bucket = match cluster.bucket(&location.bucket) {
        Ok(bucket) => bucket,
        Err(CoreError::BucketNotFound { .. }) => return Ok(None),
        Err(err) => return Err(err),
    };
    match bucket.read(&record_doc(&location.key))? {
        Some(StoredDocument {
            body: Some(body), ..
        }) => Ok(Some(serde_json::from_value(body)?)),
        _ => Ok(None),
    }
}

/// Writes `record`. With an empty `expect` the record must not exist yet;
/// otherwise the stored record must belong to the same attempt and be in
/// one of the `expect` states. A pending record past its expiry cannot be
/// committed.
pub(crate) fn write(
    bucket: &Bucket,
    record: &AtrRecord,
    level: DurabilityLevel,
    expect: &[AttemptState],
) -> CoreResult<()> {
    let doc = record_doc(&record.key());
    let body = serde_json::to_value(record)?;
    bucket.mutate(&doc, level, |current, cas| {
        let existing: Option<AtrRecord> = match current.and_then(|c| c.body.as_ref()) {
            Some(body) => Some(AtrRecord::deserialize(body)?),
            None => None,
        };
        match existing {
            None if expect.is_empty() => {}
            Some(_) if expect.is_empty() => {
                return Err(CoreError::DocumentExists { doc: doc.clone() })
            }
            None => return Err(CoreError::DocumentNotFound { doc: doc.clone() }),
            Some(existing) => {
                if existing.attempt_id != record.attempt_id || !expect.contains(&existing.state) {
                    return Err(CoreError::invalid_operation(format!(
                        "transaction record {doc} is {}",
                        existing.state
                    )));
                }
                if existing.state == AttemptState::Pending
                    && record.state == AttemptState::Committed
                    && existing.is_expired(now_millis())
                {
                    return Err(CoreError::AttemptExpired {
                        attempt: record.attempt_id,
                    });
                }
            }
        }
        Ok(Some(StoredDocument::committed(body, cas)))
    })?;
    Ok(())
}

/// Deletes a record.
pub(crate) fn delete(bucket: &Bucket, key: &str, level: DurabilityLevel) -> CoreResult<()> {
    bucket.mutate(&record_doc(key), level, |_, _| Ok(None))?;
    Ok(())
}

/// Every record in a bucket. Records that do not parse are returned as
/// errors next to their key.
pub(crate) fn scan(bucket: &Bucket) -> CoreResult<Vec<(String, CoreResult<AtrRecord>)>> {
    Ok(bucket
        .scan(TXN_COLLECTION)?
        .into_iter()
        .filter_map(|(doc, state)| {
            state.body.map(|body| {
                let record = serde_json::from_value(body).map_err(CoreError::from);
                (doc.key, record)
            })
        })
        .collect())
}
