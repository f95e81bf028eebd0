//! Compact command implementation.

use super::ClusterArgs;

/// Runs the compact command.
pub fn run(args: &ClusterArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cluster = args.connect()?;
    let reclaimed = cluster.bucket(&args.bucket)?.compact();
    cluster.close()?;

    println!("✓ Compacted {}, reclaimed {} bytes", args.bucket, reclaimed?);
    Ok(())
}
