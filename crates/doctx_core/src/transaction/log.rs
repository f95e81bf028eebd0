//! Deferred transaction log.
//!
//! Every step of a transaction is recorded here and mirrored to `tracing`.
//! The entries travel with the [`super::TransactionResult`], so a caller can
//! print the whole history of a failed transaction after the fact.

use crate::types::TransactionId;
use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Protocol detail.
    Debug,
    /// Lifecycle step.
    Info,
    /// Something went wrong but the transaction continued.
    Warn,
    /// The step failed.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        })
    }
}

/// One recorded step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Time since the transaction started.
    pub elapsed: Duration,
    /// Severity.
    pub level: LogLevel,
    /// What happened.
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>8.3}ms] {:<5} {}",
            self.elapsed.as_secs_f64() * 1000.0,
            self.level,
            self.message
        )
    }
}

#[derive(Debug)]
pub(crate) struct TransactionLog {
    transaction_id: TransactionId,
    started: Instant,
    entries: Mutex<Vec<LogEntry>>,
}

impl TransactionLog {
    pub(crate) fn new(transaction_id: TransactionId, started: Instant) -> Self {
        Self {
            transaction_id,
            started,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn record(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug | LogLevel::Info => debug!("txn {}: {}", self.transaction_id, message),
            LogLevel::Warn | LogLevel::Error => warn!("txn {}: {}", self.transaction_id, message),
        }
        self.entries.lock().push(LogEntry {
            elapsed: self.started.elapsed(),
            level,
            message,
        });
    }

    pub(crate) fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }
}
