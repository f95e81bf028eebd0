//! Stress tests for doctx.
//!
//! These tests run many transactions concurrently against the same
//! documents and check that every committed transaction was applied to
//! all of its documents and no failed one to any.

use doctx_core::{
    Cluster, Collection, CoreResult, RetryPolicy, TransactionConfig, Transactions,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total transactions run.
    pub total_ops: usize,
    /// Committed transactions.
    pub successful_ops: usize,
    /// Failed transactions.
    pub failed_ops: usize,
    /// Attempts beyond the first, summed over all transactions.
    pub retries: usize,
    /// Total duration.
    pub duration: Duration,
    /// Transactions per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, retries: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            retries,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total transactions: {}", self.total_ops);
        println!("Committed: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Retries: {}", self.retries);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} txn/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Transactions per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of counter documents each transaction increments.
    pub documents: usize,
    /// Expiration of every transaction.
    pub expiration: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 100,
            threads: 4,
            documents: 2,
            expiration: Duration::from_secs(30),
        }
    }
}

fn counter_key(index: usize) -> String {
    format!("counter-{index}")
}

/// Creates the counter documents at zero.
pub fn reset_counters(collection: &Collection, config: &StressConfig) -> CoreResult<()> {
    for i in 0..config.documents {
        collection.upsert(&counter_key(i), &json!({ "value": 0 }))?;
    }
    Ok(())
}

/// Reads the counters outside any transaction.
pub fn read_counters(collection: &Collection, config: &StressConfig) -> CoreResult<Vec<u64>> {
    (0..config.documents)
        .map(|i| {
            let doc = collection.get(&counter_key(i))?;
            Ok(doc.content()["value"].as_u64().unwrap_or(0))
        })
        .collect()
}

/// Runs `config.threads` threads, each committing `config.operations`
/// transactions that increment every counter document by one.
pub fn stress_concurrent_increments(
    cluster: &Cluster,
    collection: &Collection,
    config: &StressConfig,
) -> StressTestResult {
    reset_counters(collection, config).expect("Failed to reset counters");
    let txn_config = TransactionConfig::default()
        .expiration(config.expiration)
        .retry(RetryPolicy::default().with_max_delay(Duration::from_millis(10)));
    let transactions =
        Arc::new(Transactions::create(cluster, txn_config).expect("Failed to create transactions"));

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let retries = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let transactions = Arc::clone(&transactions);
            let collection = collection.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let retries = Arc::clone(&retries);
            let (operations, documents) = (config.operations, config.documents);

            thread::spawn(move || {
                for _ in 0..operations {
                    let outcome = transactions.run(|ctx| {
                        for i in 0..documents {
                            let doc = ctx.get_or_error(&collection, &counter_key(i))?;
                            let value = doc.content()["value"].as_u64().unwrap_or(0);
                            ctx.replace(&doc, &json!({ "value": value + 1 }))?;
                        }
                        Ok(())
                    });
                    match outcome {
                        Ok(result) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                            retries.fetch_add(result.attempts.len() - 1, Ordering::Relaxed);
                        }
                        Err(failure) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            retries.fetch_add(
                                failure.result.attempts.len().saturating_sub(1),
                                Ordering::Relaxed,
                            );
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Stress thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        retries.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Asserts every counter equals the number of committed transactions.
pub fn verify_atomicity(collection: &Collection, config: &StressConfig, result: &StressTestResult) {
    let counters = read_counters(collection, config).expect("Failed to read counters");
    for (i, value) in counters.iter().enumerate() {
        assert_eq!(
            *value as usize, result.successful_ops,
            "{} disagrees with the committed transaction count",
            counter_key(i)
        );
    }
}
