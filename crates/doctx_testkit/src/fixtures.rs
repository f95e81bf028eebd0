//! Test fixtures and cluster helpers.
//!
//! Provides convenience functions for setting up test clusters
//! and common test scenarios.

use doctx_core::{Cluster, ClusterConfig, Collection};
use serde_json::json;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Bucket every fixture works in.
pub const TEST_BUCKET: &str = "test";

/// A test cluster with automatic cleanup.
pub struct TestCluster {
    /// The cluster handle.
    pub cluster: Cluster,
    config: ClusterConfig,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestCluster {
    /// Creates a single-node in-memory cluster.
    pub fn memory() -> Self {
        Self::memory_with(ClusterConfig::default())
    }

    /// Creates an in-memory cluster with the given topology.
    pub fn memory_with(config: ClusterConfig) -> Self {
        Self {
            cluster: connect(config.clone()),
            config,
            _temp_dir: None,
        }
    }

    /// Creates a single-node cluster journaled to a temporary directory.
    pub fn file() -> Self {
        Self::file_with(ClusterConfig::default())
    }

    /// Creates a file-backed cluster with the given topology.
    pub fn file_with(config: ClusterConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = config.data_dir(temp_dir.path());
        Self {
            cluster: connect(config.clone()),
            config,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the data directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }

    /// Closes the cluster and opens it again from its journals.
    ///
    /// In-memory clusters come back empty.
    pub fn reopen(&mut self) {
        self.cluster.close().expect("Failed to close cluster");
        self.cluster = connect(self.config.clone());
    }

    /// Default collection of [`TEST_BUCKET`].
    pub fn collection(&self) -> Collection {
        self.cluster
            .bucket(TEST_BUCKET)
            .expect("Failed to open test bucket")
            .default_collection()
    }
}

impl std::ops::Deref for TestCluster {
    type Target = Cluster;

    fn deref(&self) -> &Self::Target {
        &self.cluster
    }
}

fn connect(config: ClusterConfig) -> Cluster {
    let (username, password) = (config.username.clone(), config.password.clone());
    Cluster::connect(config, &username, &password).expect("Failed to connect to test cluster")
}

/// Runs a test with a temporary in-memory cluster.
pub fn with_temp_cluster<F, R>(f: F) -> R
where
    F: FnOnce(&Cluster) -> R,
{
    let test_cluster = TestCluster::memory();
    f(&test_cluster.cluster)
}

/// Runs a test with a temporary file-backed cluster.
pub fn with_file_cluster<F, R>(f: F) -> R
where
    F: FnOnce(&Cluster, &Path) -> R,
{
    let test_cluster = TestCluster::file();
    let path: PathBuf = test_cluster
        .path()
        .expect("File cluster should have a path")
        .to_path_buf();
    f(&test_cluster.cluster, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a cluster whose default collection holds `count` documents
    /// `doc-0`.. with an `index` field.
    pub fn populated_cluster(count: usize) -> TestCluster {
        let test_cluster = TestCluster::memory();
        let collection = test_cluster.collection();
        for i in 0..count {
            collection
                .insert(&format!("doc-{i}"), &json!({ "index": i }))
                .expect("Failed to insert document");
        }
        test_cluster
    }

    /// Creates a three-node cluster keeping two copies of every document.
    pub fn replicated_cluster() -> TestCluster {
        TestCluster::memory_with(ClusterConfig::default().nodes(3).replicas(1))
    }

    /// Seeds the account pair the notification workflow works on.
    pub fn account_pair(collection: &Collection) {
        collection
            .upsert(
                "acc1",
                &json!({"type": "account", "id": "acc1", "name": "Acme Inc."}),
            )
            .expect("Failed to seed account");
        collection
            .upsert(
                "acc1evt",
                &json!({"type": "accountEvents", "accountId": "acc1", "events": []}),
            )
            .expect("Failed to seed account events");
    }
}
