//! Error types for the document store.

use crate::durability::DurabilityLevel;
use crate::types::{AttemptId, Cas, DocumentRef, NodeId};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the cluster, buckets and collections.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] doctx_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A node journal is corrupted.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A journal record failed its checksum.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// The document does not exist.
    #[error("document not found: {doc}")]
    DocumentNotFound {
        /// The missing document.
        doc: DocumentRef,
    },

    /// The document already exists.
    #[error("document already exists: {doc}")]
    DocumentExists {
        /// The existing document.
        doc: DocumentRef,
    },

    /// The document changed since it was read.
    #[error("CAS mismatch on {doc}: expected {expected}, found {actual}")]
    CasMismatch {
        /// The document.
        doc: DocumentRef,
        /// CAS the caller supplied.
        expected: Cas,
        /// CAS currently stored.
        actual: Cas,
    },

    /// A plain write hit a document that carries staged transaction data.
    #[error("document {doc} is locked by a transaction")]
    DocumentLocked {
        /// The locked document.
        doc: DocumentRef,
    },

    /// Another live transaction attempt has staged a change on the document.
    #[error("write-write conflict on {doc} with attempt {holder}")]
    WriteWriteConflict {
        /// The contended document.
        doc: DocumentRef,
        /// Attempt currently owning the staging.
        holder: AttemptId,
    },

    /// Not enough copies are online to satisfy the durability level.
    #[error("durability {level} impossible: {required} copies required, {available} available")]
    DurabilityImpossible {
        /// Requested level.
        level: DurabilityLevel,
        /// Copies that must acknowledge.
        required: usize,
        /// Copies currently online.
        available: usize,
    },

    /// The node owning the active copy is offline.
    #[error("{node} is unavailable")]
    NodeUnavailable {
        /// The offline node.
        node: NodeId,
    },

    /// A transaction record passed its expiry before the attempt could
    /// commit; other attempts may already treat its stagings as stale.
    #[error("transaction attempt {attempt} expired before committing")]
    AttemptExpired {
        /// The expired attempt.
        attempt: AttemptId,
    },

    /// The bucket does not exist.
    #[error("bucket not found: {name}")]
    BucketNotFound {
        /// Bucket name.
        name: String,
    },

    /// Credentials were rejected.
    #[error("authentication failed for user {username}")]
    AuthenticationFailed {
        /// User that tried to connect.
        username: String,
    },

    /// Another process holds the data directory.
    #[error("cluster data directory is locked by another process")]
    ClusterLocked,

    /// The cluster handle has been closed.
    #[error("cluster is closed")]
    ClusterClosed,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is invalid.
        message: String,
    },

    /// An argument or configuration value is invalid.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong.
        message: String,
    },
}

impl CoreError {
    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Whether the failure is transient, so that a transaction attempt that hit
    /// it may be retried from the start.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CasMismatch { .. }
                | Self::DocumentLocked { .. }
                | Self::WriteWriteConflict { .. }
                | Self::NodeUnavailable { .. }
        )
    }

    /// Whether the failure may have left a write applied on some copies.
    ///
    /// I/O failures happen after the in-memory copies were updated, so the
    /// caller cannot know whether the write is visible.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Storage(_))
    }
}
