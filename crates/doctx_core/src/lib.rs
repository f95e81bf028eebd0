//! # doctx core
//!
//! An in-process, replicated JSON document store with multi-document ACID
//! transactions.
//!
//! - [`Cluster`]: nodes, buckets and their data directory
//! - [`Collection`]: plain key-value access with CAS and durability levels
//! - [`Transactions`]: staged, retrying, all-or-nothing updates across
//!   documents
//!
//! ```rust,ignore
//! use doctx_core::{Cluster, ClusterConfig, TransactionConfig, Transactions};
//!
//! let cluster = Cluster::connect(ClusterConfig::default(), "Administrator", "password")?;
//! let collection = cluster.bucket("test")?.default_collection();
//! let transactions = Transactions::create(&cluster, TransactionConfig::default())?;
//! transactions.run(|ctx| {
//!     let doc = ctx.get_or_error(&collection, "acc1")?;
//!     ctx.replace(&doc, &serde_json::json!({"followups": 1}))?;
//!     Ok(())
//! })?;
//! ```

mod cluster;
mod config;
mod dir;
mod durability;
mod error;
mod journal;
mod transaction;
mod types;

pub use cluster::{
    AtrLocation, Bucket, Cluster, Collection, GetResult, StagedMutation, StagedOp,
    StoredDocument, DEFAULT_COLLECTION, TXN_COLLECTION,
};
pub use config::{ClusterConfig, RetryPolicy, TransactionConfig};
pub use dir::{ClusterDir, Manifest, MANIFEST_FORMAT_VERSION};
pub use durability::{majority, DurabilityLevel};
pub use error::{CoreError, CoreResult};
pub use journal::{crc32, Journal, JournalEntry, JournalRecordType, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use transaction::{
    AtrMutation, AtrRecord, AttemptContext, AttemptError, AttemptState, AttemptSummary,
    CleanupReport, FailureKind, LogEntry, LogLevel, TransactionFailed, TransactionGetResult,
    TransactionResult, Transactions,
};
pub use types::{now_millis, AttemptId, Cas, DocumentRef, NodeId, TransactionId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
