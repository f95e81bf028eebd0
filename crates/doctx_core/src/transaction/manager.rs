//! Running transactions.

use crate::cluster::{Bucket, Cluster};
use crate::config::TransactionConfig;
use crate::error::{CoreError, CoreResult};
use crate::transaction::attempt::AttemptContext;
use crate::transaction::cleanup::{self, CleanupReport};
use crate::transaction::error::{
    AttemptError, AttemptSummary, FailureKind, TransactionFailed, TransactionResult,
};
use crate::transaction::log::{LogLevel, TransactionLog};
use crate::types::TransactionId;
use std::time::Instant;
use tracing::{info, warn};

/// Entry point for multi-document transactions on a cluster.
///
/// # Example
///
/// ```rust,ignore
/// let transactions = Transactions::create(&cluster, TransactionConfig::default())?;
/// let accounts = cluster.bucket("test")?.default_collection();
/// transactions.run(|ctx| {
///     let account = ctx.get_or_error(&accounts, "acc1")?;
///     let mut content = account.content().clone();
///     content["followups"] = 1.into();
///     ctx.replace(&account, &content)?;
///     Ok(())
/// })?;
/// ```
#[derive(Debug, Clone)]
pub struct Transactions {
    cluster: Cluster,
    config: TransactionConfig,
}

impl Transactions {
    /// Creates a transaction runner.
    pub fn create(cluster: &Cluster, config: TransactionConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            cluster: cluster.clone(),
            config,
        })
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Runs `logic` until it commits, fails, or the transaction expires.
    ///
    /// `logic` is called once per attempt and must be safe to repeat. If it
    /// returns `Ok` without committing or rolling back, the attempt is
    /// committed. Retryable errors roll the attempt back and start a new one
    /// after a backoff; any other error rolls back and fails.
    pub fn run<F>(&self, mut logic: F) -> Result<TransactionResult, TransactionFailed>
    where
        F: FnMut(&mut AttemptContext<'_>) -> Result<(), AttemptError>,
    {
        let transaction_id = TransactionId::new();
        let started = Instant::now();
        let log = TransactionLog::new(transaction_id, started);
        let mut attempts = Vec::new();
        let mut attempt_no = 0u32;

        let Some(deadline) = started.checked_add(self.config.expiration) else {
            let cause = AttemptError::Core(CoreError::invalid_argument(format!(
                "expiration {:?} is out of range",
                self.config.expiration
            )));
            log.record(LogLevel::Error, cause.to_string());
            return Err(TransactionFailed {
                transaction_id,
                kind: FailureKind::Failed,
                cause,
                result: TransactionResult {
                    transaction_id,
                    attempts,
                    log: log.entries(),
                    unstaging_complete: true,
                    elapsed: started.elapsed(),
                },
            });
        };

        log.record(
            LogLevel::Info,
            format!(
                "transaction started, durability {}, expiration {:?}",
                self.config.durability_level, self.config.expiration
            ),
        );

        loop {
            let mut ctx = AttemptContext::new(
                &self.cluster,
                &self.config,
                &log,
                transaction_id,
                deadline,
            );
            log.record(
                LogLevel::Info,
                format!("attempt {} started as {}", attempt_no + 1, ctx.attempt_id()),
            );

            let outcome = logic(&mut ctx).and_then(|()| ctx.finish());
            let ambiguous = ctx.is_ambiguous();
            let committed = ctx.state().is_committed();

            let cause = match outcome {
                Ok(()) => {
                    attempts.push(AttemptSummary {
                        attempt_id: ctx.attempt_id(),
                        state: ctx.state(),
                    });
                    let unstaging_complete = ctx.unstaging_complete();
                    if !unstaging_complete {
                        warn!("transaction {transaction_id} committed, unstaging left for cleanup");
                    }
                    info!(
                        "transaction {transaction_id} finished in {} attempt(s)",
                        attempts.len()
                    );
                    return Ok(TransactionResult {
                        transaction_id,
                        attempts,
                        log: log.entries(),
                        unstaging_complete,
                        elapsed: started.elapsed(),
                    });
                }
                Err(cause) => cause,
            };

            log.record(
                LogLevel::Warn,
                format!("attempt {} failed: {cause}", attempt_no + 1),
            );
            if !committed && !ambiguous {
                if let Err(err) = ctx.rollback() {
                    log.record(LogLevel::Warn, format!("rollback incomplete: {err}"));
                }
            }
            attempts.push(AttemptSummary {
                attempt_id: ctx.attempt_id(),
                state: ctx.state(),
            });
            let unstaging_complete = ctx.unstaging_complete();

            let mut kind = if ambiguous {
                FailureKind::CommitAmbiguous
            } else if committed {
                FailureKind::FailedPostCommit
            } else if matches!(cause, AttemptError::Expired) {
                FailureKind::Expired
            } else {
                FailureKind::Failed
            };

            if kind == FailureKind::Failed && cause.is_retryable() {
                let delay = self.config.retry.delay_for(attempt_no);
                let resume = Instant::now().checked_add(delay);
                if resume.is_some_and(|at| at < deadline) {
                    log.record(LogLevel::Info, format!("retrying in {delay:?}"));
                    std::thread::sleep(delay);
                    attempt_no += 1;
                    continue;
                }
                log.record(LogLevel::Warn, "no time left for another attempt");
                kind = FailureKind::Expired;
            }

            warn!("transaction {transaction_id} {kind}: {cause}");
            return Err(TransactionFailed {
                transaction_id,
                kind,
                cause,
                result: TransactionResult {
                    transaction_id,
                    attempts,
                    log: log.entries(),
                    unstaging_complete,
                    elapsed: started.elapsed(),
                },
            });
        }
    }

    /// Resolves transaction records left behind in `bucket` by attempts
    /// that did not finish.
    pub fn cleanup_lost(&self, bucket: &Bucket) -> CoreResult<CleanupReport> {
        cleanup::cleanup_bucket(&self.cluster, bucket, self.config.durability_level)
    }
}
