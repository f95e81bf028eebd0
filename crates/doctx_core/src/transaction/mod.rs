//! Multi-document ACID transactions.
//!
//! A transaction runs its logic in one or more attempts. Each attempt stages
//! its writes directly on the documents, next to their committed bodies, and
//! tracks them in an active transaction record (ATR). Writing `committed`
//! into the ATR is the single atomic commit point; the stagings are then
//! copied into the bodies and the ATR is removed.
//!
//! - **Isolation**: non-transactional readers see committed bodies only.
//!   Transactional readers also see stagings whose ATR is committed.
//! - **Conflicts**: CAS checks and live stagings of other attempts abort the
//!   attempt with a retryable error; the runner backs off and retries.
//! - **Recovery**: [`Transactions::cleanup_lost`] finishes or rolls back
//!   attempts that died half way.

mod atr;
mod attempt;
mod cleanup;
mod error;
mod log;
mod manager;
mod staging;
mod state;

pub use atr::{AtrMutation, AtrRecord};
pub use attempt::{AttemptContext, TransactionGetResult};
pub use cleanup::CleanupReport;
pub use error::{AttemptError, AttemptSummary, FailureKind, TransactionFailed, TransactionResult};
pub use log::{LogEntry, LogLevel};
pub use manager::Transactions;
pub use state::AttemptState;
