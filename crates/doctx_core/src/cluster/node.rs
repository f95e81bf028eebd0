//! A node's copy of a bucket.

use crate::cluster::document::StoredDocument;
use crate::error::CoreResult;
use crate::journal::{Journal, JournalEntry};
use crate::types::{DocumentRef, NodeId};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// The documents one node holds for one bucket, with an optional journal.
#[derive(Debug)]
pub(crate) struct Node {
    id: NodeId,
    docs: RwLock<HashMap<DocumentRef, StoredDocument>>,
    journal: Option<Journal>,
}

impl Node {
    pub(crate) fn in_memory(id: NodeId) -> Self {
        Self {
            id,
            docs: RwLock::new(HashMap::new()),
            journal: None,
        }
    }

    /// Rebuilds the node from its journal.
    pub(crate) fn open(id: NodeId, journal: Journal) -> CoreResult<Self> {
        let entries = journal.replay()?;
        let mut docs = HashMap::new();
        let replayed = entries.len();
        for entry in entries {
            match entry.state {
                Some(state) => {
                    docs.insert(entry.doc, state);
                }
                None => {
                    docs.remove(&entry.doc);
                }
            }
        }
        debug!(
            "{id}: replayed {replayed} journal records, {} live documents",
            docs.len()
        );
        Ok(Self {
            id,
            docs: RwLock::new(docs),
            journal: Some(journal),
        })
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn read(&self, doc: &DocumentRef) -> Option<StoredDocument> {
        self.docs.read().get(doc).cloned()
    }

    /// Applies a document state; `None` deletes. The journal record is
    /// written first and synced when `persist` is set.
    pub(crate) fn store(
        &self,
        doc: &DocumentRef,
        state: Option<StoredDocument>,
        persist: bool,
    ) -> CoreResult<()> {
        if let Some(journal) = &self.journal {
            journal.append(
                &JournalEntry {
                    doc: doc.clone(),
                    state: state.clone(),
                },
                persist,
            )?;
        }
        let mut docs = self.docs.write();
        match state {
            Some(state) => {
                docs.insert(doc.clone(), state);
            }
            None => {
                docs.remove(doc);
            }
        }
        Ok(())
    }

    /// Documents of `collection`, sorted by key.
    pub(crate) fn scan(&self, collection: &str) -> Vec<(DocumentRef, StoredDocument)> {
        let mut out: Vec<_> = self
            .docs
            .read()
            .iter()
            .filter(|(doc, _)| doc.collection == collection)
            .map(|(doc, state)| (doc.clone(), state.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Every document held, in key order.
    pub(crate) fn snapshot(&self) -> Vec<(DocumentRef, StoredDocument)> {
        let mut out: Vec<_> = self
            .docs
            .read()
            .iter()
            .map(|(doc, state)| (doc.clone(), state.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub(crate) fn max_cas(&self) -> u64 {
        self.docs
            .read()
            .values()
            .map(|d| d.cas.as_u64())
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn sync(&self) -> CoreResult<()> {
        match &self.journal {
            Some(journal) => journal.sync(),
            None => Ok(()),
        }
    }

    /// Rewrites the journal to the live documents; returns bytes reclaimed.
    pub(crate) fn compact(&self) -> CoreResult<u64> {
        let Some(journal) = &self.journal else {
            return Ok(0);
        };
        // callers hold the bucket write lock, so no store races the rewrite
        let docs = self.docs.read();
        let mut entries: Vec<JournalEntry> = docs
            .iter()
            .map(|(doc, state)| JournalEntry {
                doc: doc.clone(),
                state: Some(state.clone()),
            })
            .collect();
        entries.sort_by(|a, b| a.doc.cmp(&b.doc));
        let before = journal.size()?;
        journal.rewrite(&entries)?;
        let after = journal.size()?;
        Ok(before.saturating_sub(after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cas;
    use doctx_storage::FileBackend;
    use serde_json::json;
    use tempfile::tempdir;

    fn doc(key: &str) -> DocumentRef {
        DocumentRef::new("_default", key)
    }

    #[test]
    fn in_memory_store_and_delete() {
        let node = Node::in_memory(NodeId::new(0));
        node.store(
            &doc("a"),
            Some(StoredDocument::committed(json!(1), Cas::new(1))),
            false,
        )
        .unwrap();
        assert_eq!(node.read(&doc("a")).unwrap().cas, Cas::new(1));
        assert_eq!(node.max_cas(), 1);

        node.store(&doc("a"), None, false).unwrap();
        assert!(node.read(&doc("a")).is_none());
        assert_eq!(node.compact().unwrap(), 0);
    }

    #[test]
    fn journal_rebuilds_node() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node-0.journal");
        {
            let journal = Journal::new(Box::new(FileBackend::open(&path).unwrap()));
            let node = Node::open(NodeId::new(0), journal).unwrap();
            for n in 1..=3u64 {
                node.store(
                    &doc("a"),
                    Some(StoredDocument::committed(json!({"n": n}), Cas::new(n))),
                    n == 3,
                )
                .unwrap();
            }
            node.store(
                &doc("b"),
                Some(StoredDocument::committed(json!({}), Cas::new(4))),
                false,
            )
            .unwrap();
            node.store(&doc("b"), None, true).unwrap();
        }

        let journal = Journal::new(Box::new(FileBackend::open(&path).unwrap()));
        let node = Node::open(NodeId::new(0), journal).unwrap();
        assert_eq!(node.read(&doc("a")).unwrap().body, Some(json!({"n": 3})));
        assert!(node.read(&doc("b")).is_none());
        assert_eq!(node.max_cas(), 3);
        assert!(node.compact().unwrap() > 0);
        assert_eq!(node.snapshot().len(), 1);
    }

    #[test]
    fn scan_filters_by_collection() {
        let node = Node::in_memory(NodeId::new(1));
        for (collection, key) in [("_default", "b"), ("_txn", "x"), ("_default", "a")] {
            node.store(
                &DocumentRef::new(collection, key),
                Some(StoredDocument::committed(json!(null), Cas::new(1))),
                false,
            )
            .unwrap();
        }
        let keys: Vec<_> = node
            .scan("_default")
            .into_iter()
            .map(|(d, _)| d.key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(node.id(), NodeId::new(1));
    }
}
