//! A single attempt of a transaction.

use crate::cluster::{AtrLocation, Bucket, Cluster, Collection, StagedMutation, StagedOp, StoredDocument};
use crate::config::TransactionConfig;
use crate::error::{CoreError, CoreResult};
use crate::transaction::atr::{self, AtrMutation, AtrRecord};
use crate::transaction::error::AttemptError;
use crate::transaction::log::{LogLevel, TransactionLog};
use crate::transaction::staging::{self, Holder};
use crate::transaction::state::AttemptState;
use crate::types::{now_millis, AttemptId, Cas, DocumentRef, TransactionId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

/// A document read or written inside a transaction.
#[derive(Debug, Clone)]
pub struct TransactionGetResult {
    collection: Collection,
    doc: DocumentRef,
    content: Value,
    cas: Cas,
}

impl TransactionGetResult {
    /// Document key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.doc.key
    }

    /// Collection and key.
    #[must_use]
    pub fn doc_ref(&self) -> &DocumentRef {
        &self.doc
    }

    /// Content as seen by the transaction.
    #[must_use]
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Deserializes the content.
    pub fn content_as<T: DeserializeOwned>(&self) -> CoreResult<T> {
        Ok(T::deserialize(&self.content)?)
    }

    /// CAS the document had when read.
    #[must_use]
    pub fn cas(&self) -> Cas {
        self.cas
    }
}

struct ActiveRecord {
    bucket: Bucket,
    record: AtrRecord,
}

struct StagedWrite {
    collection: Collection,
    doc: DocumentRef,
    cas: Cas,
    op: StagedOp,
}

struct ReadEntry {
    collection: Collection,
    cas: Cas,
}

/// Handle passed to transaction logic for one attempt.
///
/// Mutations are staged on the documents immediately and become visible to
/// everyone at once when the attempt's transaction record flips to
/// committed.
pub struct AttemptContext<'t> {
    cluster: &'t Cluster,
    config: &'t TransactionConfig,
    log: &'t TransactionLog,
    transaction_id: TransactionId,
    attempt_id: AttemptId,
    deadline: Instant,
    state: AttemptState,
    atr: Option<ActiveRecord>,
    staged: Vec<StagedWrite>,
    reads: HashMap<(String, DocumentRef), ReadEntry>,
    unstaging_complete: bool,
    ambiguous: bool,
}

impl<'t> AttemptContext<'t> {
    pub(crate) fn new(
        cluster: &'t Cluster,
        config: &'t TransactionConfig,
        log: &'t TransactionLog,
        transaction_id: TransactionId,
        deadline: Instant,
    ) -> Self {
        Self {
            cluster,
            config,
            log,
            transaction_id,
            attempt_id: AttemptId::new(),
            deadline,
            state: AttemptState::NotStarted,
            atr: None,
            staged: Vec::new(),
            reads: HashMap::new(),
            unstaging_complete: true,
            ambiguous: false,
        }
    }

    /// Transaction identifier.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Identifier of this attempt.
    #[must_use]
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Adds an application message to the deferred log.
    pub fn log(&self, message: impl Into<String>) {
        self.log.record(LogLevel::Info, message);
    }

    pub(crate) fn unstaging_complete(&self) -> bool {
        self.unstaging_complete
    }

    pub(crate) fn is_ambiguous(&self) -> bool {
        self.ambiguous
    }

    /// Reads a document. Returns `None` if it does not exist for this
    /// transaction.
    pub fn get(
        &mut self,
        collection: &Collection,
        key: &str,
    ) -> Result<Option<TransactionGetResult>, AttemptError> {
        self.ensure_active()?;
        let doc = collection.doc_ref(key);

        if let Some(index) = self.staged_index(collection, &doc) {
            let write = &self.staged[index];
            self.log.record(LogLevel::Debug, format!("get {doc}: own staged write"));
            return Ok(write.op.content().map(|content| TransactionGetResult {
                collection: collection.clone(),
                doc: doc.clone(),
                content: content.clone(),
                cas: write.cas,
            }));
        }

        let Some(stored) = collection.bucket().read(&doc)? else {
            self.log.record(LogLevel::Debug, format!("get {doc}: not found"));
            return Ok(None);
        };

        let visible = match &stored.staged {
            Some(staged) if staged.attempt_id != self.attempt_id => {
                match staging::classify(self.cluster, staged)? {
                    Holder::Committed => staged.op.content().cloned(),
                    Holder::Live | Holder::Stale => stored.body.clone(),
                }
            }
            _ => stored.body.clone(),
        };

        // the first observation is the one commit validates against
        self.reads
            .entry((collection.bucket().name().to_string(), doc.clone()))
            .or_insert_with(|| ReadEntry {
                collection: collection.clone(),
                cas: stored.cas,
            });
        self.log.record(
            LogLevel::Debug,
            format!("get {doc}: {}", stored.cas),
        );

        Ok(visible.map(|content| TransactionGetResult {
            collection: collection.clone(),
            doc,
            content,
            cas: stored.cas,
        }))
    }

    /// Reads a document that must exist.
    pub fn get_or_error(
        &mut self,
        collection: &Collection,
        key: &str,
    ) -> Result<TransactionGetResult, AttemptError> {
        self.get(collection, key)?.ok_or_else(|| {
            AttemptError::Core(CoreError::DocumentNotFound {
                doc: collection.doc_ref(key),
            })
        })
    }

    /// Stages the creation of a document.
    pub fn insert<T: Serialize + ?Sized>(
        &mut self,
        collection: &Collection,
        key: &str,
        content: &T,
    ) -> Result<TransactionGetResult, AttemptError> {
        self.ensure_active()?;
        let doc = collection.doc_ref(key);
        let content = serde_json::to_value(content)?;

        if let Some(index) = self.staged_index(collection, &doc) {
            if !matches!(self.staged[index].op, StagedOp::Remove) {
                return Err(CoreError::DocumentExists { doc }.into());
            }
            let cas = self.restage(
                index,
                None,
                StagedOp::Replace {
                    content: content.clone(),
                },
            )?;
            return Ok(self.result(collection, doc, content, cas));
        }

        self.ensure_record(collection, &doc)?;
        let op = StagedOp::Insert {
            content: content.clone(),
        };
        let staging = self.staging(op.clone())?;
        let (cluster, me) = (self.cluster, self.attempt_id);
        let cas = collection
            .bucket()
            .mutate(&doc, self.config.durability_level, |current, cas| {
                if let Some(current) = current {
                    staging::check_foreign(cluster, &doc, current, me)?;
                    if current.body.is_some() {
                        return Err(CoreError::DocumentExists { doc: doc.clone() });
                    }
                }
                Ok(Some(StoredDocument {
                    body: None,
                    cas,
                    staged: Some(staging),
                }))
            })?;

        self.log.record(LogLevel::Debug, format!("staged insert of {doc}"));
        self.push_staged(collection, &doc, cas, op);
        Ok(self.result(collection, doc, content, cas))
    }

    /// Stages new content for a document read in this attempt.
    pub fn replace<T: Serialize + ?Sized>(
        &mut self,
        doc: &TransactionGetResult,
        content: &T,
    ) -> Result<TransactionGetResult, AttemptError> {
        self.ensure_active()?;
        let content = serde_json::to_value(content)?;
        let collection = &doc.collection;

        if let Some(index) = self.staged_index(collection, &doc.doc) {
            let op = match self.staged[index].op {
                StagedOp::Insert { .. } => StagedOp::Insert {
                    content: content.clone(),
                },
                StagedOp::Replace { .. } => StagedOp::Replace {
                    content: content.clone(),
                },
                StagedOp::Remove => {
                    return Err(CoreError::DocumentNotFound {
                        doc: doc.doc.clone(),
                    }
                    .into())
                }
            };
            let cas = self.restage(index, Some(doc.cas), op)?;
            return Ok(self.result(collection, doc.doc.clone(), content, cas));
        }

        let op = StagedOp::Replace {
            content: content.clone(),
        };
        let cas = self.stage_existing(doc, op.clone())?;
        self.log.record(LogLevel::Debug, format!("staged replace of {}", doc.doc));
        self.push_staged(collection, &doc.doc, cas, op);
        Ok(self.result(collection, doc.doc.clone(), content, cas))
    }

    /// Stages the removal of a document read in this attempt.
    pub fn remove(&mut self, doc: &TransactionGetResult) -> Result<(), AttemptError> {
        self.ensure_active()?;
        let collection = &doc.collection;

        if let Some(index) = self.staged_index(collection, &doc.doc) {
            if matches!(self.staged[index].op, StagedOp::Remove) {
                return Err(CoreError::DocumentNotFound {
                    doc: doc.doc.clone(),
                }
                .into());
            }
            self.restage(index, Some(doc.cas), StagedOp::Remove)?;
            return Ok(());
        }

        let cas = self.stage_existing(doc, StagedOp::Remove)?;
        self.log.record(LogLevel::Debug, format!("staged remove of {}", doc.doc));
        self.push_staged(collection, &doc.doc, cas, StagedOp::Remove);
        Ok(())
    }

    /// Commits the attempt.
    ///
    /// Errors before the commit point leave the attempt rollback-able.
    /// Failures while unstaging after it are logged and reported through
    /// [`crate::TransactionResult::unstaging_complete`].
    pub fn commit(&mut self) -> Result<(), AttemptError> {
        self.ensure_active()?;
        self.validate_reads()?;

        let level = self.config.durability_level;
        let Some(active) = self.atr.as_mut() else {
            self.state = AttemptState::Completed;
            self.log.record(LogLevel::Info, "read-only attempt completed");
            return Ok(());
        };

        let mut record = active.record.clone();
        record.state = AttemptState::Committed;
        if let Err(err) = atr::write(&active.bucket, &record, level, &[AttemptState::Pending]) {
            if let CoreError::AttemptExpired { .. } = err {
                self.log.record(
                    LogLevel::Warn,
                    "transaction record expired before the commit point",
                );
                return Err(AttemptError::Expired);
            }
            self.ambiguous = err.is_ambiguous();
            self.log.record(
                LogLevel::Error,
                format!("could not reach the commit point: {err}"),
            );
            return Err(err.into());
        }
        active.record = record;
        self.state = AttemptState::Committed;
        self.log.record(LogLevel::Info, "commit point reached");

        let mut complete = true;
        for write in &self.staged {
            let bucket = write.collection.bucket();
            match staging::commit_document(bucket, &write.doc, self.attempt_id, level) {
                Ok(true) => self
                    .log
                    .record(LogLevel::Debug, format!("unstaged {}", write.doc)),
                Ok(false) => {
                    complete = false;
                    self.log.record(
                        LogLevel::Warn,
                        format!("{} no longer carries this attempt's staging", write.doc),
                    );
                }
                Err(err) => {
                    complete = false;
                    self.log.record(
                        LogLevel::Warn,
                        format!("unstaging {} failed, left for cleanup: {err}", write.doc),
                    );
                }
            }
        }

        if complete {
            if let Err(err) = atr::delete(&active.bucket, &active.record.key(), level) {
                self.log.record(
                    LogLevel::Warn,
                    format!("could not remove transaction record: {err}"),
                );
            }
            self.state = AttemptState::Completed;
            self.log.record(LogLevel::Info, "attempt completed");
        } else {
            self.unstaging_complete = false;
        }
        Ok(())
    }

    /// Rolls the attempt back. Stagings are removed even if some step fails;
    /// the first failure is returned.
    pub fn rollback(&mut self) -> Result<(), AttemptError> {
        match self.state {
            AttemptState::Committed | AttemptState::Completed => {
                return Err(CoreError::invalid_operation(
                    "cannot roll back an attempt past its commit point",
                )
                .into())
            }
            AttemptState::RolledBack => return Ok(()),
            _ => {}
        }

        let level = self.config.durability_level;
        let Some(active) = self.atr.as_mut() else {
            self.state = AttemptState::RolledBack;
            self.log.record(LogLevel::Info, "attempt rolled back");
            return Ok(());
        };

        let mut first_error: Option<CoreError> = None;
        let mut record = active.record.clone();
        record.state = AttemptState::Aborted;
        match atr::write(
            &active.bucket,
            &record,
            level,
            &[AttemptState::Pending, AttemptState::Aborted],
        ) {
            Ok(()) => active.record = record,
            Err(err) => {
                self.log.record(
                    LogLevel::Warn,
                    format!("could not mark transaction record aborted: {err}"),
                );
                first_error = Some(err);
            }
        }
        self.state = AttemptState::Aborted;

        for write in &self.staged {
            let bucket = write.collection.bucket();
            if let Err(err) = staging::rollback_document(bucket, &write.doc, self.attempt_id, level) {
                self.log.record(
                    LogLevel::Warn,
                    format!("could not clear staging on {}: {err}", write.doc),
                );
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            None => {
                if let Err(err) = atr::delete(&active.bucket, &active.record.key(), level) {
                    self.log.record(
                        LogLevel::Warn,
                        format!("could not remove transaction record: {err}"),
                    );
                }
                self.state = AttemptState::RolledBack;
                self.log.record(LogLevel::Info, "attempt rolled back");
                Ok(())
            }
            Some(err) => Err(err.into()),
        }
    }

    /// Commits unless the logic already committed or rolled back.
    pub(crate) fn finish(&mut self) -> Result<(), AttemptError> {
        if self.state.is_active() {
            self.commit()
        } else {
            Ok(())
        }
    }

    fn ensure_active(&self) -> Result<(), AttemptError> {
        if !self.state.is_active() {
            return Err(CoreError::invalid_operation(format!(
                "attempt {} is already {}",
                self.attempt_id, self.state
            ))
            .into());
        }
        if Instant::now() >= self.deadline {
            self.log.record(LogLevel::Warn, "transaction expired");
            return Err(AttemptError::Expired);
        }
        Ok(())
    }

    fn staged_index(&self, collection: &Collection, doc: &DocumentRef) -> Option<usize> {
        self.staged.iter().position(|w| {
            w.doc == *doc && w.collection.bucket().name() == collection.bucket().name()
        })
    }

    fn result(
        &self,
        collection: &Collection,
        doc: DocumentRef,
        content: Value,
        cas: Cas,
    ) -> TransactionGetResult {
        TransactionGetResult {
            collection: collection.clone(),
            doc,
            content,
            cas,
        }
    }

    fn push_staged(&mut self, collection: &Collection, doc: &DocumentRef, cas: Cas, op: StagedOp) {
        self.staged.push(StagedWrite {
            collection: collection.clone(),
            doc: doc.clone(),
            cas,
            op,
        });
    }

    fn staging(&self, op: StagedOp) -> CoreResult<StagedMutation> {
        let bucket = self
            .atr
            .as_ref()
            .map(|a| a.bucket.name().to_string())
            .ok_or_else(|| CoreError::invalid_operation("no transaction record"))?;
        Ok(StagedMutation {
            transaction_id: self.transaction_id,
            attempt_id: self.attempt_id,
            atr: AtrLocation::for_attempt(bucket, self.attempt_id),
            op,
        })
    }

    /// Creates the transaction record on first use and lists `doc` in it.
    fn ensure_record(&mut self, collection: &Collection, doc: &DocumentRef) -> CoreResult<()> {
        let level = self.config.durability_level;
        let mutation = AtrMutation {
            bucket: collection.bucket().name().to_string(),
            doc: doc.clone(),
        };

        match self.atr.as_mut() {
            Some(active) => {
                if active.record.mutations.contains(&mutation) {
                    return Ok(());
                }
                let mut record = active.record.clone();
                record.mutations.push(mutation);
                atr::write(&active.bucket, &record, level, &[AttemptState::Pending])?;
                active.record = record;
            }
            None => {
                let now = now_millis();
                let remaining = self.deadline.saturating_duration_since(Instant::now());
                let remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX);
                let record = AtrRecord {
                    transaction_id: self.transaction_id,
                    attempt_id: self.attempt_id,
                    state: AttemptState::Pending,
                    started_at_ms: now,
                    expires_at_ms: now.saturating_add(remaining_ms),
                    mutations: vec![mutation],
                };
                let bucket = collection.bucket().clone();
                atr::write(&bucket, &record, level, &[])?;
                self.log.record(
                    LogLevel::Info,
                    format!("created transaction record {}/{}", bucket.name(), record.key()),
                );
                self.atr = Some(ActiveRecord { bucket, record });
                self.state = AttemptState::Pending;
            }
        }
        Ok(())
    }

    /// Stages `op` on a document this attempt has not staged yet.
    fn stage_existing(&mut self, doc: &TransactionGetResult, op: StagedOp) -> CoreResult<Cas> {
        self.ensure_record(&doc.collection, &doc.doc)?;
        let staging = self.staging(op)?;
        let (cluster, me, expected) = (self.cluster, self.attempt_id, doc.cas);
        let target = &doc.doc;
        doc.collection
            .bucket()
            .mutate(target, self.config.durability_level, |current, cas| {
                let current = current.ok_or_else(|| CoreError::DocumentNotFound {
                    doc: target.clone(),
                })?;
                if current.cas != expected {
                    return Err(CoreError::CasMismatch {
                        doc: target.clone(),
                        expected,
                        actual: current.cas,
                    });
                }
                staging::check_foreign(cluster, target, current, me)?;
                if current.body.is_none() {
                    return Err(CoreError::DocumentNotFound {
                        doc: target.clone(),
                    });
                }
                Ok(Some(StoredDocument {
                    body: current.body.clone(),
                    cas,
                    staged: Some(staging),
                }))
            })
    }

    /// Replaces this attempt's own staging on `staged[index]`.
    fn restage(&mut self, index: usize, expected: Option<Cas>, op: StagedOp) -> CoreResult<Cas> {
        let staging = self.staging(op.clone())?;
        let write = &self.staged[index];
        let (me, staged_cas) = (self.attempt_id, write.cas);
        let target = write.doc.clone();
        if let Some(expected) = expected {
            if expected != staged_cas {
                return Err(CoreError::CasMismatch {
                    doc: target,
                    expected,
                    actual: staged_cas,
                });
            }
        }

        let cas = write.collection.bucket().mutate(
            &target,
            self.config.durability_level,
            |current, cas| {
                let current = current
                    .filter(|c| c.is_staged_by(me) && c.cas == staged_cas)
                    .ok_or_else(|| {
                        CoreError::invalid_operation(format!("{target} lost its staging"))
                    })?;
                Ok(Some(StoredDocument {
                    body: current.body.clone(),
                    cas,
                    staged: Some(staging),
                }))
            },
        )?;

        self.log.record(LogLevel::Debug, format!("restaged {target}"));
        let write = &mut self.staged[index];
        write.cas = cas;
        write.op = op;
        Ok(cas)
    }

    /// Documents read but not written must be unchanged.
    fn validate_reads(&self) -> CoreResult<()> {
        for ((bucket, doc), read) in &self.reads {
            let written = self
                .staged
                .iter()
                .any(|w| w.doc == *doc && w.collection.bucket().name() == bucket);
            if written {
                continue;
            }
            let current = read.collection.bucket().read(doc)?;
            let actual = current.map_or(Cas::new(0), |d| d.cas);
            if actual != read.cas {
                self.log.record(
                    LogLevel::Warn,
                    format!("{doc} changed since it was read"),
                );
                return Err(CoreError::CasMismatch {
                    doc: doc.clone(),
                    expected: read.cas,
                    actual,
                });
            }
        }
        Ok(())
    }
}
