//! Transaction errors and results.

use crate::error::CoreError;
use crate::transaction::log::LogEntry;
use crate::transaction::state::AttemptState;
use crate::types::{AttemptId, TransactionId};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error ending a single attempt.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// A cluster operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The transaction ran out of time.
    #[error("transaction expired")]
    Expired,

    /// The application logic gave up; the attempt is rolled back and not
    /// retried.
    #[error("application error: {0}")]
    Application(Box<dyn std::error::Error + Send + Sync>),
}

impl AttemptError {
    /// Wraps an application error.
    pub fn application(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Application(err.into())
    }

    /// Whether a fresh attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Core(err) if err.is_retryable())
    }
}

impl From<serde_json::Error> for AttemptError {
    fn from(err: serde_json::Error) -> Self {
        Self::Core(CoreError::Json(err))
    }
}

/// How a transaction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Rolled back; nothing is visible.
    Failed,
    /// Ran out of time before committing; nothing is visible.
    Expired,
    /// The commit point write may or may not have landed.
    CommitAmbiguous,
    /// The writes were committed and are visible, but the logic returned an
    /// error afterwards.
    FailedPostCommit,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::CommitAmbiguous => "commit ambiguous",
            Self::FailedPostCommit => "failed after commit",
        })
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptSummary {
    /// Attempt identifier.
    pub attempt_id: AttemptId,
    /// State the attempt finished in.
    pub state: AttemptState,
}

/// What a transaction did, successful or not.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    /// Transaction identifier.
    pub transaction_id: TransactionId,
    /// Every attempt, in order.
    pub attempts: Vec<AttemptSummary>,
    /// Deferred log of the whole transaction.
    pub log: Vec<LogEntry>,
    /// `false` if the commit point passed but some documents are still
    /// staged; lost-transaction cleanup finishes them.
    pub unstaging_complete: bool,
    /// Wall time spent.
    pub elapsed: Duration,
}

impl TransactionResult {
    /// The deferred log.
    #[must_use]
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// State of the last attempt.
    #[must_use]
    pub fn final_state(&self) -> Option<AttemptState> {
        self.attempts.last().map(|a| a.state)
    }
}

/// A transaction did not commit.
#[derive(Debug, Error)]
#[error("transaction {transaction_id} {kind}: {cause}")]
pub struct TransactionFailed {
    /// Transaction identifier.
    pub transaction_id: TransactionId,
    /// Failure class.
    pub kind: FailureKind,
    /// Error that ended the last attempt.
    #[source]
    pub cause: AttemptError,
    /// Attempts and log up to the failure.
    pub result: TransactionResult,
}

impl TransactionFailed {
    /// Attempts and deferred log.
    #[must_use]
    pub fn result(&self) -> &TransactionResult {
        &self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cas, DocumentRef};

    #[test]
    fn only_transient_core_errors_retry() {
        let conflict = AttemptError::from(CoreError::CasMismatch {
            doc: DocumentRef::new("_default", "k"),
            expected: Cas::new(1),
            actual: Cas::new(2),
        });
        assert!(conflict.is_retryable());
        assert!(!AttemptError::Expired.is_retryable());
        assert!(!AttemptError::application("forced rollback").is_retryable());
    }

    #[test]
    fn failure_message() {
        let id = TransactionId::new();
        let failed = TransactionFailed {
            transaction_id: id,
            kind: FailureKind::Failed,
            cause: AttemptError::application("boom"),
            result: TransactionResult {
                transaction_id: id,
                attempts: Vec::new(),
                log: Vec::new(),
                unstaging_complete: true,
                elapsed: Duration::ZERO,
            },
        };
        assert_eq!(
            failed.to_string(),
            format!("transaction {id} failed: application error: boom")
        );
        assert!(failed.result().final_state().is_none());
    }
}
