//! doctx CLI
//!
//! Drives the email-notification workflow against a doctx cluster: two
//! related documents are updated in one multi-document transaction.
//!
//! # Commands
//!
//! - `notify` - Seed the scenario documents and run the notification transaction
//! - `seed` - Create the scenario documents if they are missing
//! - `import` - Bulk load a JSON list of documents
//! - `show` - Print a document
//! - `cleanup` - Resolve transactions left behind by crashed runs
//! - `compact` - Rewrite node journals to their live documents

mod commands;

use clap::{Parser, Subcommand};
use commands::scenario::ScenarioKind;
use commands::ClusterArgs;
use doctx_core::DurabilityLevel;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Multi-document transaction demo on a replicated document store.
#[derive(Parser)]
#[command(name = "doctx")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    cluster: ClusterArgs,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record an email sent to a client, atomically across two documents
    Notify {
        /// Which sample data set to use
        #[arg(short, long, value_enum, default_value = "account")]
        scenario: ScenarioKind,

        /// Body of the email
        #[arg(short, long, default_value = "Hey! What's up?")]
        message: String,

        /// none, majority, majority_and_persist_on_master or persist_to_majority
        #[arg(short, long, default_value = "none")]
        durability: DurabilityLevel,

        /// Maximum time the transaction may take, across retries
        #[arg(short, long, default_value = "15")]
        timeout_secs: u64,

        /// Fail the transaction after both writes to demonstrate rollback
        #[arg(long)]
        force_rollback: bool,
    },

    /// Create the scenario documents if they are missing
    Seed {
        /// Which sample data set to use
        #[arg(short, long, value_enum, default_value = "account")]
        scenario: ScenarioKind,
    },

    /// Upsert every element of a JSON list, keyed by one of its fields
    Import {
        /// JSON file holding an array of objects
        file: PathBuf,

        /// Target collection
        #[arg(short, long, default_value = doctx_core::DEFAULT_COLLECTION)]
        collection: String,

        /// Field whose value becomes the document key
        #[arg(short, long, default_value = "id")]
        key_field: String,
    },

    /// Print a document as JSON
    Show {
        /// Document key
        key: String,

        /// Collection to read from
        #[arg(short, long, default_value = doctx_core::DEFAULT_COLLECTION)]
        collection: String,
    },

    /// Finish or roll back transactions that did not complete
    Cleanup,

    /// Rewrite node journals to their live documents
    Compact,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Notify {
            scenario,
            message,
            durability,
            timeout_secs,
            force_rollback,
        } => {
            let options = commands::notify::NotifyOptions {
                scenario: scenario.scenario(),
                message,
                durability,
                timeout: Duration::from_secs(timeout_secs),
                force_rollback,
            };
            commands::notify::run(&cli.cluster, &options)?;
        }
        Commands::Seed { scenario } => {
            commands::seed::run(&cli.cluster, &scenario.scenario())?;
        }
        Commands::Import {
            file,
            collection,
            key_field,
        } => {
            commands::import::run(&cli.cluster, &file, &collection, &key_field)?;
        }
        Commands::Show { key, collection } => {
            cli.cluster.require_data_dir("show")?;
            commands::show::run(&cli.cluster, &collection, &key)?;
        }
        Commands::Cleanup => {
            cli.cluster.require_data_dir("cleanup")?;
            commands::cleanup::run(&cli.cluster)?;
        }
        Commands::Compact => {
            cli.cluster.require_data_dir("compact")?;
            commands::compact::run(&cli.cluster)?;
        }
        Commands::Version => {
            println!("doctx CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("doctx core v{}", doctx_core::VERSION);
        }
    }

    Ok(())
}
