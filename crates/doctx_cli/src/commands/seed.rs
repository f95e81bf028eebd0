//! Seed command implementation.

use super::scenario::Scenario;
use super::ClusterArgs;
use doctx_core::{Collection, CoreError, CoreResult};
use serde_json::Value;
use tracing::info;

/// Which documents a seeding pass created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeedReport {
    /// The account or customer document was created.
    pub primary_created: bool,
    /// The events document was created.
    pub events_created: bool,
}

/// Runs the seed command.
pub fn run(args: &ClusterArgs, scenario: &Scenario) -> Result<(), Box<dyn std::error::Error>> {
    let cluster = args.connect()?;
    let collection = cluster.bucket(&args.bucket)?.default_collection();
    let report = seed(&collection, scenario)?;
    cluster.close()?;

    println!(
        "✓ {} {}",
        scenario.primary_key,
        if report.primary_created { "created" } else { "already present" }
    );
    println!(
        "✓ {} {}",
        scenario.events_key,
        if report.events_created { "created" } else { "already present" }
    );
    Ok(())
}

/// Creates the scenario's documents if they do not exist.
pub fn seed(collection: &Collection, scenario: &Scenario) -> CoreResult<SeedReport> {
    let events_created = create_missing(
        collection,
        scenario.events_key,
        &scenario.events_seed(),
        &format!("{} events", scenario.doc_type),
    )?;
    let primary_created = create_missing(
        collection,
        scenario.primary_key,
        &scenario.primary_seed(),
        scenario.doc_type,
    )?;
    Ok(SeedReport {
        primary_created,
        events_created,
    })
}

fn create_missing(collection: &Collection, key: &str, content: &Value, what: &str) -> CoreResult<bool> {
    if collection.exists(key)? {
        info!("{what} {key} already exists...");
        return Ok(false);
    }
    info!("Creating {what} {key}...");
    match collection.insert(key, content) {
        Ok(_) => Ok(true),
        // created concurrently
        Err(CoreError::DocumentExists { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}
