//! Cleanup command implementation.

use super::ClusterArgs;
use doctx_core::{TransactionConfig, Transactions};

/// Runs the cleanup command.
pub fn run(args: &ClusterArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cluster = args.connect()?;
    let bucket = cluster.bucket(&args.bucket)?;
    let report = Transactions::create(&cluster, TransactionConfig::default())?.cleanup_lost(&bucket);
    cluster.close()?;

    let report = report?;
    println!("✓ Cleanup of {}: {report}", args.bucket);
    if report.failed > 0 {
        println!("  {} record(s) could not be resolved; run cleanup again", report.failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support;
    use tempfile::tempdir;

    #[test]
    fn runs_on_clean_bucket() {
        let dir = tempdir().unwrap();
        let args = test_support::args(dir.path());
        run(&args).unwrap();
        run(&args).unwrap();
    }
}
