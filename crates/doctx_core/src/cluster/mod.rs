//! In-process replicated document cluster.
//!
//! A [`Cluster`] owns a fixed set of nodes. Each [`Bucket`] keeps one
//! document map per node; a document lives on its active node and on the
//! replicas following it. Nodes can be taken offline to exercise the
//! durability rules.

mod bucket;
mod collection;
mod document;
mod node;

pub use bucket::{Bucket, DEFAULT_COLLECTION};
pub use collection::{Collection, GetResult};
pub use document::{AtrLocation, StagedMutation, StagedOp, StoredDocument, TXN_COLLECTION};

use crate::config::ClusterConfig;
use crate::dir::{ClusterDir, Manifest};
use crate::error::{CoreError, CoreResult};
use crate::journal::Journal;
use crate::types::NodeId;
use node::Node;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// State every bucket of a cluster observes.
#[derive(Debug)]
pub(crate) struct ClusterShared {
    online: Vec<AtomicBool>,
    closed: AtomicBool,
}

impl ClusterShared {
    pub(crate) fn new(nodes: usize) -> Self {
        Self {
            online: (0..nodes).map(|_| AtomicBool::new(true)).collect(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_online(&self, node: NodeId) -> bool {
        self.online
            .get(node.index())
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub(crate) fn set_online(&self, node: NodeId, online: bool) -> bool {
        match self.online.get(node.index()) {
            Some(flag) => {
                flag.store(online, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CoreError::ClusterClosed)
        } else {
            Ok(())
        }
    }
}

struct ClusterInner {
    config: ClusterConfig,
    shared: Arc<ClusterShared>,
    buckets: RwLock<BTreeMap<String, Bucket>>,
    dir: Mutex<Option<ClusterDir>>,
    manifest: Mutex<Option<Manifest>>,
}

/// Handle to a cluster. Cheap to clone; all clones share state.
///
/// # Example
///
/// ```rust,ignore
/// use doctx_core::{Cluster, ClusterConfig};
///
/// let config = ClusterConfig::default().nodes(3).replicas(1);
/// let cluster = Cluster::connect(config, "Administrator", "password")?;
/// let accounts = cluster.bucket("test")?.default_collection();
/// accounts.upsert("acc1", &serde_json::json!({"name": "Alice"}))?;
/// ```
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

impl Cluster {
    /// Starts a cluster and authenticates against its configured user.
    ///
    /// With a data directory, the directory is locked, the manifest loaded
    /// (or created) and every known bucket rebuilt from its journals.
    pub fn connect(config: ClusterConfig, username: &str, password: &str) -> CoreResult<Self> {
        config.validate()?;
        if username != config.username || password != config.password {
            return Err(CoreError::AuthenticationFailed {
                username: username.to_string(),
            });
        }

        let (dir, manifest) = match &config.data_dir {
            Some(path) => {
                let dir = ClusterDir::open(path)?;
                let manifest = match dir.load_manifest()? {
                    Some(manifest) => {
                        if manifest.nodes != config.nodes || manifest.replicas != config.replicas {
                            return Err(CoreError::invalid_argument(format!(
                                "{} was created with {} nodes and {} replicas, not {} and {}",
                                path.display(),
                                manifest.nodes,
                                manifest.replicas,
                                config.nodes,
                                config.replicas
                            )));
                        }
                        manifest
                    }
                    None => {
                        let manifest = Manifest::new(config.nodes, config.replicas);
                        dir.save_manifest(&manifest)?;
                        manifest
                    }
                };
                (Some(dir), Some(manifest))
            }
            None => (None, None),
        };

        let known: Vec<String> = manifest
            .as_ref()
            .map(|m| m.buckets.clone())
            .unwrap_or_default();

        let cluster = Self {
            inner: Arc::new(ClusterInner {
                shared: Arc::new(ClusterShared::new(config.nodes)),
                config,
                buckets: RwLock::new(BTreeMap::new()),
                dir: Mutex::new(dir),
                manifest: Mutex::new(manifest),
            }),
        };

        {
            let mut buckets = cluster.inner.buckets.write();
            for name in known {
                let bucket = cluster.build_bucket(&name)?;
                buckets.insert(name, bucket);
            }
        }

        info!(
            "connected to cluster: {} nodes, {} replicas, {}",
            cluster.inner.config.nodes,
            cluster.inner.config.replicas,
            cluster
                .inner
                .config
                .data_dir
                .as_ref()
                .map_or_else(|| "in memory".to_string(), |p| p.display().to_string())
        );
        Ok(cluster)
    }

    /// A single-node in-memory cluster with the default credentials.
    pub fn open_in_memory() -> CoreResult<Self> {
        let config = ClusterConfig::default();
        let (username, password) = (config.username.clone(), config.password.clone());
        Self::connect(config, &username, &password)
    }

    /// Opens a bucket, creating it on first use when the configuration
    /// allows.
    pub fn bucket(&self, name: &str) -> CoreResult<Bucket> {
        self.inner.shared.ensure_open()?;
        if let Some(bucket) = self.inner.buckets.read().get(name) {
            return Ok(bucket.clone());
        }

        let mut buckets = self.inner.buckets.write();
        if let Some(bucket) = buckets.get(name) {
            return Ok(bucket.clone());
        }
        if !self.inner.config.create_buckets {
            return Err(CoreError::BucketNotFound {
                name: name.to_string(),
            });
        }
        validate_bucket_name(name)?;

        let bucket = self.build_bucket(name)?;
        if let Some(dir) = self.inner.dir.lock().as_ref() {
            let mut manifest = self.inner.manifest.lock();
            if let Some(manifest) = manifest.as_mut() {
                if manifest.add_bucket(name) {
                    dir.save_manifest(manifest)?;
                }
            }
        }
        buckets.insert(name.to_string(), bucket.clone());
        info!("created bucket {name}");
        Ok(bucket)
    }

    fn build_bucket(&self, name: &str) -> CoreResult<Bucket> {
        let dir = self.inner.dir.lock();
        let mut nodes = Vec::with_capacity(self.inner.config.nodes);
        for index in 0..self.inner.config.nodes {
            let id = NodeId::new(index as u16);
            let node = match dir.as_ref() {
                Some(dir) => {
                    Node::open(id, Journal::open_file(&dir.journal_path(name, id))?)?
                }
                None => Node::in_memory(id),
            };
            nodes.push(node);
        }
        Ok(Bucket::new(
            name.to_string(),
            nodes,
            self.inner.config.replicas,
            Arc::clone(&self.inner.shared),
        ))
    }

    /// Names of the open buckets, sorted.
    #[must_use]
    pub fn bucket_names(&self) -> Vec<String> {
        self.inner.buckets.read().keys().cloned().collect()
    }

    /// Takes a node offline or brings it back.
    pub fn set_node_online(&self, node: NodeId, online: bool) -> CoreResult<()> {
        self.inner.shared.ensure_open()?;
        if !self.inner.shared.set_online(node, online) {
            return Err(CoreError::invalid_argument(format!(
                "{node} does not exist in a {}-node cluster",
                self.node_count()
            )));
        }
        info!("{node} is now {}", if online { "online" } else { "offline" });
        Ok(())
    }

    /// Whether a node is online.
    #[must_use]
    pub fn is_node_online(&self, node: NodeId) -> bool {
        self.inner.shared.is_online(node)
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.config.nodes
    }

    /// The configuration the cluster was started with.
    #[must_use]
    pub fn config(&self) -> &ClusterConfig {
        &self.inner.config
    }

    /// Whether [`Cluster::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shared.ensure_open().is_err()
    }

    /// Syncs every journal and releases the data directory. Later calls on
    /// any handle fail with [`CoreError::ClusterClosed`].
    pub fn close(&self) -> CoreResult<()> {
        if !self.inner.shared.close() {
            return Ok(());
        }
        let buckets = std::mem::take(&mut *self.inner.buckets.write());
        for bucket in buckets.values() {
            bucket.sync()?;
        }
        if let Some(dir) = self.inner.dir.lock().take() {
            if let Some(manifest) = self.inner.manifest.lock().as_ref() {
                dir.save_manifest(manifest)?;
            }
        }
        info!("cluster closed");
        Ok(())
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.inner.config.nodes)
            .field("replicas", &self.inner.config.replicas)
            .field("buckets", &self.bucket_names())
            .finish()
    }
}

fn validate_bucket_name(name: &str) -> CoreResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 100
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '%'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::invalid_argument(format!(
            "invalid bucket name {name:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durability::DurabilityLevel;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn wrong_password_is_rejected() {
        let config = ClusterConfig::default().credentials("test", "couchbase");
        let err = Cluster::connect(config.clone(), "test", "nope").unwrap_err();
        assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
        assert!(Cluster::connect(config, "test", "couchbase").is_ok());
    }

    #[test]
    fn buckets_are_created_on_demand() {
        let cluster = Cluster::open_in_memory().unwrap();
        cluster.bucket("test").unwrap();
        cluster.bucket("alpha").unwrap();
        assert_eq!(cluster.bucket_names(), vec!["alpha", "test"]);
    }

    #[test]
    fn missing_bucket_without_creation() {
        let config = ClusterConfig::default().create_buckets(false);
        let cluster = Cluster::connect(config, "Administrator", "password").unwrap();
        assert!(matches!(
            cluster.bucket("test"),
            Err(CoreError::BucketNotFound { .. })
        ));
    }

    #[test]
    fn bad_bucket_names() {
        let cluster = Cluster::open_in_memory().unwrap();
        assert!(cluster.bucket("").is_err());
        assert!(cluster.bucket("../etc").is_err());
        assert!(cluster.bucket("a b").is_err());
    }

    #[test]
    fn closed_cluster_rejects_calls() {
        let cluster = Cluster::open_in_memory().unwrap();
        let bucket = cluster.bucket("test").unwrap();
        cluster.close().unwrap();
        cluster.close().unwrap();
        assert!(cluster.is_closed());
        assert!(matches!(cluster.bucket("test"), Err(CoreError::ClusterClosed)));
        assert!(matches!(
            bucket.default_collection().get("k"),
            Err(CoreError::ClusterClosed)
        ));
    }

    #[test]
    fn node_status_changes() {
        let cluster =
            Cluster::connect(ClusterConfig::default().nodes(3), "Administrator", "password")
                .unwrap();
        cluster.set_node_online(NodeId::new(1), false).unwrap();
        assert!(!cluster.is_node_online(NodeId::new(1)));
        assert!(cluster.is_node_online(NodeId::new(0)));
        assert!(cluster.set_node_online(NodeId::new(7), false).is_err());
    }

    #[test]
    fn file_cluster_survives_reopen() {
        let dir = tempdir().unwrap();
        let config = ClusterConfig::default()
            .nodes(3)
            .replicas(1)
            .data_dir(dir.path());
        {
            let cluster = Cluster::connect(config.clone(), "Administrator", "password").unwrap();
            let c = cluster
                .bucket("test")
                .unwrap()
                .default_collection()
                .with_durability(DurabilityLevel::PersistToMajority);
            c.insert("acc1", &json!({"followups": 1})).unwrap();
            c.insert("acc2", &json!({"followups": 2})).unwrap();
            c.remove("acc2", None).unwrap();
            assert!(matches!(
                Cluster::connect(config.clone(), "Administrator", "password"),
                Err(CoreError::ClusterLocked)
            ));
            cluster.close().unwrap();
        }

        let cluster = Cluster::connect(config, "Administrator", "password").unwrap();
        assert_eq!(cluster.bucket_names(), vec!["test"]);
        let bucket = cluster.bucket("test").unwrap();
        let c = bucket.default_collection();
        assert_eq!(c.get("acc1").unwrap().content()["followups"], 1);
        assert!(!c.exists("acc2").unwrap());

        // new writes continue the CAS sequence
        let before = c.get("acc1").unwrap().cas();
        let after = c.upsert("acc1", &json!({"followups": 5})).unwrap();
        assert!(after > before);
        assert!(bucket.compact().unwrap() > 0);
    }

    #[test]
    fn topology_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let config = ClusterConfig::default().data_dir(dir.path());
        Cluster::connect(config.clone(), "Administrator", "password")
            .unwrap()
            .close()
            .unwrap();
        let err = Cluster::connect(config.nodes(2), "Administrator", "password").unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }
}
