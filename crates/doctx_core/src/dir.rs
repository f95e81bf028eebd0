//! Cluster data directory.
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK                       # advisory exclusive lock
//! ├─ MANIFEST                   # JSON: format version, topology, buckets
//! └─ <bucket>/
//!    └─ node-<id>.journal       # one journal per node hosting the bucket
//! ```
//!
//! Only one process may hold a data directory at a time; a second open fails
//! with [`CoreError::ClusterLocked`].

use crate::error::{CoreError, CoreResult};
use crate::types::NodeId;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TEMP: &str = "MANIFEST.tmp";

/// Current manifest format.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Persistent description of a cluster directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version.
    pub format_version: u32,
    /// Number of nodes the journals were written with.
    pub nodes: usize,
    /// Replicas per document.
    pub replicas: usize,
    /// Known buckets, sorted.
    pub buckets: Vec<String>,
}

impl Manifest {
    /// Empty manifest for a new directory.
    #[must_use]
    pub fn new(nodes: usize, replicas: usize) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            nodes,
            replicas,
            buckets: Vec::new(),
        }
    }

    /// Records a bucket; returns `false` if it was already known.
    pub fn add_bucket(&mut self, name: &str) -> bool {
        match self.buckets.binary_search_by(|b| b.as_str().cmp(name)) {
            Ok(_) => false,
            Err(pos) => {
                self.buckets.insert(pos, name.to_string());
                true
            }
        }
    }
}

/// Locked handle on a cluster data directory.
#[derive(Debug)]
pub struct ClusterDir {
    path: PathBuf,
    _lock_file: File,
}

impl ClusterDir {
    /// Opens (creating if needed) and locks a data directory.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_argument(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::ClusterLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Root of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Journal file of `node` for `bucket`.
    #[must_use]
    pub fn journal_path(&self, bucket: &str, node: NodeId) -> PathBuf {
        self.path.join(bucket).join(format!("{node}.journal"))
    }

    /// Reads the manifest; `None` for a fresh directory.
    pub fn load_manifest(&self) -> CoreResult<Option<Manifest>> {
        let path = self.path.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        if data.is_empty() {
            return Ok(None);
        }
        let manifest: Manifest = serde_json::from_slice(&data)?;
        if manifest.format_version != MANIFEST_FORMAT_VERSION {
            return Err(CoreError::invalid_operation(format!(
                "unsupported manifest format {}",
                manifest.format_version
            )));
        }
        Ok(Some(manifest))
    }

    /// Writes the manifest through a temporary file and a rename.
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        let temp = self.path.join(MANIFEST_TEMP);
        let data = serde_json::to_vec_pretty(manifest)?;
        let mut file = File::create(&temp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, self.path.join(MANIFEST_FILE))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let _first = ClusterDir::open(dir.path()).unwrap();
        assert!(matches!(
            ClusterDir::open(dir.path()),
            Err(CoreError::ClusterLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        drop(ClusterDir::open(dir.path()).unwrap());
        assert!(ClusterDir::open(dir.path()).is_ok());
    }

    #[test]
    fn manifest_survives_reopen() {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::new(3, 1);
        assert!(manifest.add_bucket("test"));
        assert!(manifest.add_bucket("alpha"));
        assert!(!manifest.add_bucket("test"));
        {
            let cluster_dir = ClusterDir::open(dir.path()).unwrap();
            assert!(cluster_dir.load_manifest().unwrap().is_none());
            cluster_dir.save_manifest(&manifest).unwrap();
        }
        let cluster_dir = ClusterDir::open(dir.path()).unwrap();
        let loaded = cluster_dir.load_manifest().unwrap().unwrap();
        assert_eq!(loaded.buckets, vec!["alpha".to_string(), "test".to_string()]);
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn journal_paths_are_per_bucket_and_node() {
        let dir = tempdir().unwrap();
        let cluster_dir = ClusterDir::open(dir.path()).unwrap();
        let path = cluster_dir.journal_path("test", NodeId::new(2));
        assert!(path.ends_with("test/node-2.journal"));
    }
}
