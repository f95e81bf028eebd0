//! CLI command implementations.

pub mod cleanup;
pub mod compact;
pub mod import;
pub mod notify;
pub mod scenario;
pub mod seed;
pub mod show;

use clap::Args;
use doctx_core::{Cluster, ClusterConfig, CoreResult};
use std::path::PathBuf;
use tracing::info;

/// User the demo cluster is provisioned with.
pub const CLUSTER_USERNAME: &str = "test";
/// Password of [`CLUSTER_USERNAME`].
pub const CLUSTER_PASSWORD: &str = "couchbase";

/// Connection and topology flags shared by every command.
#[derive(Debug, Clone, Args)]
pub struct ClusterArgs {
    /// Directory holding the cluster's journals; in memory if omitted
    #[arg(global = true, short = 'p', long)]
    pub data_dir: Option<PathBuf>,

    /// Bucket to work in
    #[arg(global = true, short, long, default_value = "test")]
    pub bucket: String,

    /// User to connect as
    #[arg(global = true, short, long, default_value = CLUSTER_USERNAME)]
    pub username: String,

    /// Password to connect with
    #[arg(global = true, long, default_value = CLUSTER_PASSWORD)]
    pub password: String,

    /// Number of cluster nodes
    #[arg(global = true, long, default_value = "1")]
    pub nodes: usize,

    /// Replicas per document
    #[arg(global = true, long, default_value = "0")]
    pub replicas: usize,
}

impl ClusterArgs {
    /// Connects to the cluster these flags describe.
    pub fn connect(&self) -> CoreResult<Cluster> {
        let mut config = ClusterConfig::default()
            .nodes(self.nodes)
            .replicas(self.replicas)
            .credentials(CLUSTER_USERNAME, CLUSTER_PASSWORD);
        match &self.data_dir {
            Some(dir) => config = config.data_dir(dir),
            None => info!("no --data-dir given, the cluster lives in memory for this run"),
        }
        Cluster::connect(config, &self.username, &self.password)
    }

    /// Fails unless a data directory was given.
    pub fn require_data_dir(&self, command: &str) -> Result<(), String> {
        match self.data_dir {
            Some(_) => Ok(()),
            None => Err(format!("--data-dir is required for {command}")),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use doctx_core::CoreError;
    use tempfile::tempdir;

    #[test]
    fn connects_with_demo_credentials() {
        let dir = tempdir().unwrap();
        let cluster = test_support::args(dir.path()).connect().unwrap();
        assert_eq!(cluster.node_count(), 1);
    }

    #[test]
    fn rejects_wrong_password() {
        let dir = tempdir().unwrap();
        let mut args = test_support::args(dir.path());
        args.password = "wrong".to_string();
        assert!(matches!(
            args.connect(),
            Err(CoreError::AuthenticationFailed { .. })
        ));
    }

    #[test]
    fn data_dir_requirement() {
        let dir = tempdir().unwrap();
        let mut args = test_support::args(dir.path());
        assert!(args.require_data_dir("show").is_ok());
        args.data_dir = None;
        assert_eq!(
            args.require_data_dir("show").unwrap_err(),
            "--data-dir is required for show"
        );
    }
}
