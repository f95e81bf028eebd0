//! Non-transactional key-value access to a collection.

use crate::cluster::bucket::Bucket;
use crate::cluster::document::StoredDocument;
use crate::durability::DurabilityLevel;
use crate::error::{CoreError, CoreResult};
use crate::types::{Cas, DocumentRef};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Result of a [`Collection::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct GetResult {
    content: Value,
    cas: Cas,
}

impl GetResult {
    /// Document content.
    #[must_use]
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Deserializes the content.
    pub fn content_as<T: DeserializeOwned>(&self) -> CoreResult<T> {
        Ok(T::deserialize(&self.content)?)
    }

    /// CAS at the time of the read.
    #[must_use]
    pub fn cas(&self) -> Cas {
        self.cas
    }

    /// Takes the content.
    #[must_use]
    pub fn into_content(self) -> Value {
        self.content
    }
}

/// A named collection inside a bucket.
///
/// Reads return the committed body; staged transactional changes are not
/// visible here. Writes to a document carrying staged transaction data fail
/// with [`CoreError::DocumentLocked`].
#[derive(Debug, Clone)]
pub struct Collection {
    bucket: Bucket,
    name: String,
    durability: DurabilityLevel,
}

impl Collection {
    pub(crate) fn new(bucket: Bucket, name: &str) -> Self {
        Self {
            bucket,
            name: name.to_string(),
            durability: DurabilityLevel::None,
        }
    }

    /// Same collection, writing with `level`.
    #[must_use]
    pub fn with_durability(mut self, level: DurabilityLevel) -> Self {
        self.durability = level;
        self
    }

    /// Collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning bucket.
    #[must_use]
    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Durability used by writes.
    #[must_use]
    pub fn durability(&self) -> DurabilityLevel {
        self.durability
    }

    /// Address of `key` in this collection.
    #[must_use]
    pub fn doc_ref(&self, key: &str) -> DocumentRef {
        DocumentRef::new(self.name.as_str(), key)
    }

    /// Fetches a committed document.
    pub fn get(&self, key: &str) -> CoreResult<GetResult> {
        let doc = self.doc_ref(key);
        match self.bucket.read(&doc)? {
            Some(StoredDocument {
                body: Some(content),
                cas,
                ..
            }) => Ok(GetResult { content, cas }),
            _ => Err(CoreError::DocumentNotFound { doc }),
        }
    }

    /// Whether a committed document exists.
    pub fn exists(&self, key: &str) -> CoreResult<bool> {
        Ok(self
            .bucket
            .read(&self.doc_ref(key))?
            .is_some_and(|d| d.body.is_some()))
    }

    /// Creates a document; fails if it exists.
    pub fn insert<T: Serialize + ?Sized>(&self, key: &str, content: &T) -> CoreResult<Cas> {
        let doc = self.doc_ref(key);
        let content = serde_json::to_value(content)?;
        self.bucket.mutate(&doc, self.durability, |current, cas| {
            if let Some(current) = current {
                if current.body.is_some() {
                    return Err(CoreError::DocumentExists { doc: doc.clone() });
                }
                if current.staged.is_some() {
                    return Err(CoreError::DocumentLocked { doc: doc.clone() });
                }
            }
            Ok(Some(StoredDocument::committed(content, cas)))
        })
    }

    /// Creates or overwrites a document.
    pub fn upsert<T: Serialize + ?Sized>(&self, key: &str, content: &T) -> CoreResult<Cas> {
        let doc = self.doc_ref(key);
        let content = serde_json::to_value(content)?;
        self.bucket.mutate(&doc, self.durability, |current, cas| {
            if current.is_some_and(|c| c.staged.is_some()) {
                return Err(CoreError::DocumentLocked { doc: doc.clone() });
            }
            Ok(Some(StoredDocument::committed(content, cas)))
        })
    }

    /// Overwrites an existing document, optionally only if its CAS matches.
    pub fn replace<T: Serialize + ?Sized>(
        &self,
        key: &str,
        content: &T,
        cas: Option<Cas>,
    ) -> CoreResult<Cas> {
        let doc = self.doc_ref(key);
        let content = serde_json::to_value(content)?;
        self.bucket.mutate(&doc, self.durability, |current, new_cas| {
            check_writable(&doc, current, cas)?;
            Ok(Some(StoredDocument::committed(content, new_cas)))
        })
    }

    /// Deletes an existing document, optionally only if its CAS matches.
    pub fn remove(&self, key: &str, cas: Option<Cas>) -> CoreResult<()> {
        let doc = self.doc_ref(key);
        self.bucket.mutate(&doc, self.durability, |current, _| {
            check_writable(&doc, current, cas)?;
            Ok(None)
        })?;
        Ok(())
    }
}

fn check_writable(
    doc: &DocumentRef,
    current: Option<&StoredDocument>,
    expected: Option<Cas>,
) -> CoreResult<()> {
    let current = match current {
        Some(c) if c.body.is_some() => c,
        _ => return Err(CoreError::DocumentNotFound { doc: doc.clone() }),
    };
    if current.staged.is_some() {
        return Err(CoreError::DocumentLocked { doc: doc.clone() });
    }
    if let Some(expected) = expected {
        if expected != current.cas {
            return Err(CoreError::CasMismatch {
                doc: doc.clone(),
                expected,
                actual: current.cas,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;
    use serde::Deserialize;
    use serde_json::json;

    fn collection() -> Collection {
        Cluster::open_in_memory()
            .unwrap()
            .bucket("test")
            .unwrap()
            .default_collection()
    }

    #[test]
    fn insert_then_get() {
        let c = collection();
        let cas = c.insert("acc1", &json!({"name": "Alice"})).unwrap();
        let got = c.get("acc1").unwrap();
        assert_eq!(got.cas(), cas);
        assert_eq!(got.content()["name"], "Alice");
        assert!(c.exists("acc1").unwrap());
        assert!(!c.exists("acc2").unwrap());
    }

    #[test]
    fn insert_existing_fails() {
        let c = collection();
        c.insert("k", &json!(1)).unwrap();
        assert!(matches!(
            c.insert("k", &json!(2)),
            Err(CoreError::DocumentExists { .. })
        ));
    }

    #[test]
    fn get_missing_fails() {
        let c = collection();
        let err = c.get("nope").unwrap_err();
        assert_eq!(err.to_string(), "document not found: _default/nope");
    }

    #[test]
    fn replace_checks_cas() {
        let c = collection();
        let cas = c.insert("k", &json!({"v": 1})).unwrap();
        let newer = c.replace("k", &json!({"v": 2}), Some(cas)).unwrap();
        assert!(matches!(
            c.replace("k", &json!({"v": 3}), Some(cas)),
            Err(CoreError::CasMismatch { .. })
        ));
        c.replace("k", &json!({"v": 3}), Some(newer)).unwrap();
        c.replace("k", &json!({"v": 4}), None).unwrap();
        assert_eq!(c.get("k").unwrap().content()["v"], 4);
    }

    #[test]
    fn remove_then_missing() {
        let c = collection();
        c.upsert("k", &json!(1)).unwrap();
        c.remove("k", None).unwrap();
        assert!(!c.exists("k").unwrap());
        assert!(matches!(
            c.remove("k", None),
            Err(CoreError::DocumentNotFound { .. })
        ));
        assert!(matches!(
            c.replace("k", &json!(1), None),
            Err(CoreError::DocumentNotFound { .. })
        ));
    }

    #[test]
    fn content_as_deserializes() {
        #[derive(Deserialize, Serialize, PartialEq, Debug)]
        struct Account {
            name: String,
            followups: u32,
        }
        let c = collection();
        let account = Account {
            name: "Alice".into(),
            followups: 2,
        };
        c.upsert("acc1", &account).unwrap();
        let back: Account = c.get("acc1").unwrap().content_as().unwrap();
        assert_eq!(back, account);
    }

    #[test]
    fn collections_are_separate_key_spaces() {
        let bucket = Cluster::open_in_memory().unwrap().bucket("test").unwrap();
        bucket.collection("a").upsert("k", &json!("a")).unwrap();
        bucket.collection("b").upsert("k", &json!("b")).unwrap();
        assert_eq!(bucket.collection("a").get("k").unwrap().into_content(), json!("a"));
        assert_eq!(bucket.document_count().unwrap(), 2);
    }
}
