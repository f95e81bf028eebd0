//! Stored document state.

use crate::types::{AttemptId, Cas, TransactionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Collection holding active transaction records.
pub const TXN_COLLECTION: &str = "_txn";

/// A document as held by one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Committed content. `None` when the document only exists as a staged
    /// transactional insert.
    pub body: Option<Value>,
    /// CAS of the last mutation.
    pub cas: Cas,
    /// Transaction metadata carried beside the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged: Option<StagedMutation>,
}

impl StoredDocument {
    /// A plain committed document.
    #[must_use]
    pub fn committed(body: Value, cas: Cas) -> Self {
        Self {
            body: Some(body),
            cas,
            staged: None,
        }
    }

    /// Whether the document carries a staging from `attempt`.
    #[must_use]
    pub fn is_staged_by(&self, attempt: AttemptId) -> bool {
        self.staged.as_ref().is_some_and(|s| s.attempt_id == attempt)
    }
}

/// Pending change staged by a transaction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedMutation {
    /// Owning transaction.
    pub transaction_id: TransactionId,
    /// Owning attempt.
    pub attempt_id: AttemptId,
    /// Where the attempt's transaction record lives.
    pub atr: AtrLocation,
    /// The change.
    pub op: StagedOp,
}

/// Location of an active transaction record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtrLocation {
    /// Bucket holding the record.
    pub bucket: String,
    /// Key of the record in [`TXN_COLLECTION`].
    pub key: String,
}

impl AtrLocation {
    /// Record location for `attempt` in `bucket`.
    pub fn for_attempt(bucket: impl Into<String>, attempt: AttemptId) -> Self {
        Self {
            bucket: bucket.into(),
            key: format!("atr::{attempt}"),
        }
    }
}

/// Kind of staged change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StagedOp {
    /// Create the document.
    Insert {
        /// New content.
        content: Value,
    },
    /// Overwrite the document.
    Replace {
        /// New content.
        content: Value,
    },
    /// Delete the document.
    Remove,
}

impl StagedOp {
    /// Content the document will have once the change is applied.
    #[must_use]
    pub fn content(&self) -> Option<&Value> {
        match self {
            Self::Insert { content } | Self::Replace { content } => Some(content),
            Self::Remove => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn staged_document_serializes_with_metadata() {
        let attempt = AttemptId::new();
        let doc = StoredDocument {
            body: Some(json!({"followups": 1})),
            cas: Cas::new(9),
            staged: Some(StagedMutation {
                transaction_id: TransactionId::new(),
                attempt_id: attempt,
                atr: AtrLocation::for_attempt("test", attempt),
                op: StagedOp::Replace {
                    content: json!({"followups": 2}),
                },
            }),
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["staged"]["op"]["op"], "replace");
        assert_eq!(value["staged"]["atr"]["key"], format!("atr::{attempt}"));

        let back: StoredDocument = serde_json::from_value(value).unwrap();
        assert!(back.is_staged_by(attempt));
        assert!(!back.is_staged_by(AttemptId::new()));
    }

    #[test]
    fn remove_has_no_content() {
        assert!(StagedOp::Remove.content().is_none());
        let insert = StagedOp::Insert { content: json!(1) };
        assert_eq!(insert.content(), Some(&json!(1)));
    }
}
