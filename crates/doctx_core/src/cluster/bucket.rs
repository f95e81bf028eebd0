//! Buckets: a named key space spread over the cluster's nodes.

use crate::cluster::collection::Collection;
use crate::cluster::document::{StoredDocument, TXN_COLLECTION};
use crate::cluster::node::Node;
use crate::cluster::ClusterShared;
use crate::durability::DurabilityLevel;
use crate::error::{CoreError, CoreResult};
use crate::types::{Cas, DocumentRef};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Name of the collection used when none is given.
pub const DEFAULT_COLLECTION: &str = "_default";

pub(crate) struct BucketInner {
    name: String,
    nodes: Vec<Node>,
    replicas: usize,
    cas_clock: AtomicU64,
    write_lock: Mutex<()>,
    shared: Arc<ClusterShared>,
}

/// Handle to a bucket. Cheap to clone.
///
/// Each document is owned by an active node, picked by a stable hash of its
/// address, and by `replicas` nodes following it in ring order. Reads are
/// served by the active node. Writes go to every online owner under a
/// per-bucket lock after the durability level has been checked against the
/// owners currently online.
#[derive(Clone)]
pub struct Bucket {
    inner: Arc<BucketInner>,
}

impl Bucket {
    pub(crate) fn new(
        name: String,
        nodes: Vec<Node>,
        replicas: usize,
        shared: Arc<ClusterShared>,
    ) -> Self {
        let max_cas = nodes.iter().map(Node::max_cas).max().unwrap_or(0);
        Self {
            inner: Arc::new(BucketInner {
                name,
                nodes,
                replicas,
                cas_clock: AtomicU64::new(max_cas + 1),
                write_lock: Mutex::new(()),
                shared,
            }),
        }
    }

    /// A standalone bucket without replicas whose nodes write to the
    /// given journals.
    #[cfg(test)]
    pub(crate) fn with_journals(name: &str, journals: Vec<crate::journal::Journal>) -> CoreResult<Self> {
        let nodes = journals
            .into_iter()
            .enumerate()
            .map(|(i, journal)| Node::open(crate::types::NodeId::new(i as u16), journal))
            .collect::<CoreResult<Vec<_>>>()?;
        let shared = Arc::new(ClusterShared::new(nodes.len()));
        Ok(Self::new(name.to_string(), nodes, 0, shared))
    }

    /// Bucket name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The `_default` collection.
    #[must_use]
    pub fn default_collection(&self) -> Collection {
        self.collection(DEFAULT_COLLECTION)
    }

    /// A named collection. Collections need no creation.
    #[must_use]
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self.clone(), name)
    }

    /// Number of nodes hosting the bucket.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.nodes.len()
    }

    /// Replicas per document.
    #[must_use]
    pub fn replicas(&self) -> usize {
        self.inner.replicas
    }

    /// Committed documents outside the transaction record collection.
    pub fn document_count(&self) -> CoreResult<usize> {
        self.inner.shared.ensure_open()?;
        let mut count = 0;
        for (index, node) in self.inner.nodes.iter().enumerate() {
            self.ensure_online(node)?;
            count += node
                .snapshot()
                .iter()
                .filter(|(doc, state)| {
                    doc.collection != TXN_COLLECTION
                        && state.body.is_some()
                        && self.primary_index(doc) == index
                })
                .count();
        }
        Ok(count)
    }

    /// Rewrites every node journal to its live documents. Returns the number
    /// of bytes reclaimed.
    pub fn compact(&self) -> CoreResult<u64> {
        self.inner.shared.ensure_open()?;
        let _guard = self.inner.write_lock.lock();
        let mut reclaimed = 0;
        for node in &self.inner.nodes {
            reclaimed += node.compact()?;
        }
        debug!("bucket {}: compacted, {reclaimed} bytes reclaimed", self.name());
        Ok(reclaimed)
    }

    /// Node indices owning `doc`, active first.
    pub(crate) fn owners(&self, doc: &DocumentRef) -> Vec<usize> {
        let n = self.inner.nodes.len();
        let primary = self.primary_index(doc);
        (0..=self.inner.replicas).map(|i| (primary + i) % n).collect()
    }

    fn primary_index(&self, doc: &DocumentRef) -> usize {
        (placement_hash(doc) % self.inner.nodes.len() as u64) as usize
    }

    fn ensure_online(&self, node: &Node) -> CoreResult<()> {
        if self.inner.shared.is_online(node.id()) {
            Ok(())
        } else {
            Err(CoreError::NodeUnavailable { node: node.id() })
        }
    }

    /// Reads a document from its active node.
    pub(crate) fn read(&self, doc: &DocumentRef) -> CoreResult<Option<StoredDocument>> {
        self.inner.shared.ensure_open()?;
        let primary = &self.inner.nodes[self.primary_index(doc)];
        self.ensure_online(primary)?;
        Ok(primary.read(doc))
    }

    /// Atomically mutates one document on all of its online owners.
    ///
    /// `f` receives the active copy's current state and the CAS the new state
    /// must carry, and returns the new state (`None` deletes). Nothing is
    /// applied unless enough owners are online for `level`, the active one
    /// among them, and `f` succeeds.
    pub(crate) fn mutate<F>(
        &self,
        doc: &DocumentRef,
        level: DurabilityLevel,
        f: F,
    ) -> CoreResult<Cas>
    where
        F: FnOnce(Option<&StoredDocument>, Cas) -> CoreResult<Option<StoredDocument>>,
    {
        self.inner.shared.ensure_open()?;
        let _guard = self.inner.write_lock.lock();

        let owners = self.owners(doc);
        let online: Vec<&Node> = owners
            .iter()
            .map(|&i| &self.inner.nodes[i])
            .filter(|node| self.inner.shared.is_online(node.id()))
            .collect();
        let required = level.required_acks(owners.len());
        if online.len() < required {
            return Err(CoreError::DurabilityImpossible {
                level,
                required,
                available: online.len(),
            });
        }
        let primary = &self.inner.nodes[owners[0]];
        self.ensure_online(primary)?;

        let current = primary.read(doc);
        let cas = Cas::new(self.inner.cas_clock.fetch_add(1, Ordering::SeqCst));
        let next = f(current.as_ref(), cas)?;

        let persists = level.required_persists(owners.len());
        for (i, node) in online.iter().enumerate() {
            node.store(doc, next.clone(), i < persists)?;
        }
        Ok(cas)
    }

    /// Documents of `collection` as held by their active nodes, in key order.
    pub(crate) fn scan(&self, collection: &str) -> CoreResult<Vec<(DocumentRef, StoredDocument)>> {
        self.inner.shared.ensure_open()?;
        let mut out = Vec::new();
        for (index, node) in self.inner.nodes.iter().enumerate() {
            self.ensure_online(node)?;
            out.extend(
                node.scan(collection)
                    .into_iter()
                    .filter(|(doc, _)| self.primary_index(doc) == index),
            );
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    #[cfg(test)]
    pub(crate) fn read_copy(&self, node: usize, doc: &DocumentRef) -> Option<StoredDocument> {
        self.inner.nodes.get(node).and_then(|n| n.read(doc))
    }

    pub(crate) fn sync(&self) -> CoreResult<()> {
        for node in &self.inner.nodes {
            node.sync()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.inner.name)
            .field("nodes", &self.inner.nodes.len())
            .field("replicas", &self.inner.replicas)
            .finish()
    }
}

/// FNV-1a over `collection/key`; stable across builds so journals keep
/// matching their owners.
fn placement_hash(doc: &DocumentRef) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    doc.collection
        .bytes()
        .chain(std::iter::once(b'/'))
        .chain(doc.key.bytes())
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;
    use serde_json::json;

    fn bucket(nodes: u16, replicas: usize) -> (Bucket, Arc<ClusterShared>) {
        let shared = Arc::new(ClusterShared::new(nodes as usize));
        let nodes = (0..nodes).map(|i| Node::in_memory(NodeId::new(i))).collect();
        (
            Bucket::new("test".into(), nodes, replicas, Arc::clone(&shared)),
            shared,
        )
    }

    fn put(content: serde_json::Value) -> impl FnOnce(Option<&StoredDocument>, Cas) -> CoreResult<Option<StoredDocument>> {
        move |_, cas| Ok(Some(StoredDocument::committed(content, cas)))
    }

    #[test]
    fn owners_are_consecutive_ring_positions() {
        let (bucket, _) = bucket(3, 1);
        let doc = DocumentRef::new("_default", "acc1");
        let owners = bucket.owners(&doc);
        assert_eq!(owners.len(), 2);
        assert_eq!(owners[1], (owners[0] + 1) % 3);
        assert_eq!(bucket.owners(&doc), owners);
    }

    #[test]
    fn write_reaches_every_owner() {
        let (bucket, _) = bucket(3, 2);
        let doc = DocumentRef::new("_default", "acc1");
        let cas = bucket
            .mutate(&doc, DurabilityLevel::PersistToMajority, put(json!({"a": 1})))
            .unwrap();
        for node in 0..3 {
            assert_eq!(bucket.read_copy(node, &doc).unwrap().cas, cas);
        }
    }

    #[test]
    fn cas_strictly_increases() {
        let (bucket, _) = bucket(1, 0);
        let doc = DocumentRef::new("_default", "k");
        let first = bucket.mutate(&doc, DurabilityLevel::None, put(json!(1))).unwrap();
        let second = bucket.mutate(&doc, DurabilityLevel::None, put(json!(2))).unwrap();
        assert!(second > first);
    }

    #[test]
    fn durability_checked_before_applying() {
        let (bucket, shared) = bucket(3, 2);
        let doc = DocumentRef::new("_default", "acc1");
        let owners = bucket.owners(&doc);
        shared.set_online(NodeId::new(owners[1] as u16), false);
        shared.set_online(NodeId::new(owners[2] as u16), false);

        let err = bucket
            .mutate(&doc, DurabilityLevel::Majority, put(json!(1)))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::DurabilityImpossible {
                required: 2,
                available: 1,
                ..
            }
        ));
        assert!(bucket.read(&doc).unwrap().is_none());

        // a single ack is still possible
        bucket.mutate(&doc, DurabilityLevel::None, put(json!(1))).unwrap();
        assert!(bucket.read(&doc).unwrap().is_some());
        assert!(bucket.read_copy(owners[1], &doc).is_none());
    }

    #[test]
    fn offline_active_node_rejects_reads() {
        let (bucket, shared) = bucket(2, 1);
        let doc = DocumentRef::new("_default", "x");
        let primary = bucket.owners(&doc)[0];
        shared.set_online(NodeId::new(primary as u16), false);
        assert!(matches!(
            bucket.read(&doc),
            Err(CoreError::NodeUnavailable { .. })
        ));
    }

    #[test]
    fn failed_closure_applies_nothing() {
        let (bucket, _) = bucket(1, 0);
        let doc = DocumentRef::new("_default", "k");
        let result = bucket.mutate(&doc, DurabilityLevel::None, |_, _| {
            Err(CoreError::invalid_operation("no"))
        });
        assert!(result.is_err());
        assert!(bucket.read(&doc).unwrap().is_none());
    }

    #[test]
    fn count_and_scan_use_active_copies() {
        let (bucket, _) = bucket(3, 2);
        for key in ["a", "b", "c", "d"] {
            bucket
                .mutate(&DocumentRef::new("_default", key), DurabilityLevel::None, put(json!({})))
                .unwrap();
        }
        bucket
            .mutate(&DocumentRef::new(TXN_COLLECTION, "atr::x"), DurabilityLevel::None, put(json!({})))
            .unwrap();
        assert_eq!(bucket.document_count().unwrap(), 4);
        let keys: Vec<_> = bucket
            .scan("_default")
            .unwrap()
            .into_iter()
            .map(|(d, _)| d.key)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn closed_cluster_rejects_access() {
        let (bucket, shared) = bucket(1, 0);
        shared.close();
        assert!(matches!(
            bucket.read(&DocumentRef::new("_default", "k")),
            Err(CoreError::ClusterClosed)
        ));
    }
}
