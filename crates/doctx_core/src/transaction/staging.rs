//! Reading and resolving staged mutations.

use crate::cluster::{Bucket, Cluster, StagedMutation, StoredDocument};
use crate::durability::DurabilityLevel;
use crate::error::{CoreError, CoreResult};
use crate::transaction::atr;
use crate::transaction::state::AttemptState;
use crate::types::{now_millis, AttemptId, DocumentRef};

/// Standing of the attempt behind a staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Holder {
    /// Passed its commit point; the staged content is the truth.
    Committed,
    /// Pending and not expired.
    Live,
    /// Aborted, expired, or gone; the staging may be overwritten.
    Stale,
}

pub(crate) fn classify(cluster: &Cluster, staged: &StagedMutation) -> CoreResult<Holder> {
    let Some(record) = atr::load(cluster, &staged.atr)? else {
        return Ok(Holder::Stale);
    };
    if record.attempt_id != staged.attempt_id {
        return Ok(Holder::Stale);
    }
    Ok(match record.state {
        AttemptState::Committed => Holder::Committed,
        AttemptState::Pending if !record.is_expired(now_millis()) => Holder::Live,
        _ => Holder::Stale,
    })
}

/// Fails with [`CoreError::WriteWriteConflict`] if another attempt holds a
/// staging on the document that must not be overwritten.
pub(crate) fn check_foreign(
    cluster: &Cluster,
    doc: &DocumentRef,
    current: &StoredDocument,
    me: AttemptId,
) -> CoreResult<()> {
    match &current.staged {
        Some(staged) if staged.attempt_id != me => match classify(cluster, staged)? {
            Holder::Committed | Holder::Live => Err(CoreError::WriteWriteConflict {
                doc: doc.clone(),
                holder: staged.attempt_id,
            }),
            Holder::Stale => Ok(()),
        },
        _ => Ok(()),
    }
}

/// Applies `attempt`'s staging to the body. Returns `false` if the document
/// no longer carries it.
pub(crate) fn commit_document(
    bucket: &Bucket,
    doc: &DocumentRef,
    attempt: AttemptId,
    level: DurabilityLevel,
) -> CoreResult<bool> {
    if !bucket.read(doc)?.is_some_and(|d| d.is_staged_by(attempt)) {
        return Ok(false);
    }
    bucket.mutate(doc, level, |current, cas| {
        let staged = current
            .and_then(|c| c.staged.as_ref())
            .filter(|s| s.attempt_id == attempt)
            .ok_or_else(|| CoreError::invalid_operation(format!("{doc} lost its staging")))?;
        Ok(staged
            .op
            .content()
            .map(|content| StoredDocument::committed(content.clone(), cas)))
    })?;
    Ok(true)
}

/// Drops `attempt`'s staging, deleting documents that only existed as a
/// staged insert. Returns `false` if the document no longer carries it.
pub(crate) fn rollback_document(
    bucket: &Bucket,
    doc: &DocumentRef,
    attempt: AttemptId,
    level: DurabilityLevel,
) -> CoreResult<bool> {
    if !bucket.read(doc)?.is_some_and(|d| d.is_staged_by(attempt)) {
        return Ok(false);
    }
    bucket.mutate(doc, level, |current, cas| {
        let current = current
            .filter(|c| c.is_staged_by(attempt))
            .ok_or_else(|| CoreError::invalid_operation(format!("{doc} lost its staging")))?;
        Ok(current
            .body
            .clone()
            .map(|body| StoredDocument::committed(body, cas)))
    })?;
    Ok(true)
}
