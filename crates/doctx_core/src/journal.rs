//! Per-node document journal.
//!
//! Every time a node applies a document state it appends that state to its
//! journal. Reopening a file-backed cluster replays the journals; the last
//! record for a document wins.
//!
//! ## Record format
//!
//! ```text
//! | magic "DTXJ" (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The payload is the JSON encoding of a
//! [`JournalEntry`]. The CRC covers everything before it.
//!
//! ## Replay policy
//!
//! A header or payload cut short at the tail is a write torn by a crash: the
//! tail is dropped and replay ends cleanly. Anything else that does not parse
//! (bad magic, unknown version or type, CRC mismatch) is corruption and
//! fails the open.

use crate::cluster::StoredDocument;
use crate::error::{CoreError, CoreResult};
use crate::types::DocumentRef;
use doctx_storage::{FileBackend, StorageBackend, StorageResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Magic bytes opening every record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"DTXJ";

/// Current record format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;

/// Extension of the file a compaction is written to before it replaces
/// the journal.
const COMPACT_EXTENSION: &str = "journal.compact";

/// Kind of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JournalRecordType {
    /// A document state was stored.
    Store = 1,
    /// A document was deleted.
    Tombstone = 2,
}

impl JournalRecordType {
    /// Decodes the type byte.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Store),
            2 => Some(Self::Tombstone),
            _ => None,
        }
    }
}

/// One journaled document state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// The document.
    pub doc: DocumentRef,
    /// Its state after the write; `None` for a deletion.
    pub state: Option<StoredDocument>,
}

impl JournalEntry {
    fn record_type(&self) -> JournalRecordType {
        if self.state.is_some() {
            JournalRecordType::Store
        } else {
            JournalRecordType::Tombstone
        }
    }

    fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = serde_json::to_vec(self)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_argument("journal record too large"))?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        buf.extend_from_slice(&JOURNAL_MAGIC);
        buf.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        buf.push(self.record_type() as u8);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }
}

/// Append-only journal over a storage backend.
pub struct Journal {
    backend: Mutex<Box<dyn StorageBackend>>,
    path: Option<PathBuf>,
}

impl Journal {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
            path: None,
        }
    }

    /// Opens the journal file at `path`, creating it and its parent
    /// directories if missing.
    pub fn open_file(path: &Path) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Ok(Self {
            backend: Mutex::new(Box::new(backend)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Appends an entry; syncs the backend when `persist` is set.
    pub fn append(&self, entry: &JournalEntry, persist: bool) -> CoreResult<u64> {
        let record = entry.encode()?;
        let mut backend = self.backend.lock();
        let offset = backend.append(&record)?;
        if persist {
            backend.sync()?;
        } else {
            backend.flush()?;
        }
        Ok(offset)
    }

    /// Reads every complete record, trimming a torn tail.
    pub fn replay(&self) -> CoreResult<Vec<JournalEntry>> {
        let mut backend = self.backend.lock();
        let size = backend.size()?;
        let mut entries = Vec::new();
        let mut offset = 0u64;

        while offset < size {
            if size - offset < HEADER_SIZE as u64 {
                break;
            }
            let header = backend.read_at(offset, HEADER_SIZE)?;
            if header[0..4] != JOURNAL_MAGIC {
                return Err(CoreError::journal_corruption(format!(
                    "bad magic at offset {offset}"
                )));
            }
            let version = u16::from_le_bytes([header[4], header[5]]);
            if version != JOURNAL_VERSION {
                return Err(CoreError::journal_corruption(format!(
                    "unsupported version {version} at offset {offset}"
                )));
            }
            let record_type = JournalRecordType::from_byte(header[6]).ok_or_else(|| {
                CoreError::journal_corruption(format!(
                    "unknown record type {} at offset {offset}",
                    header[6]
                ))
            })?;
            let len = u64::from(u32::from_le_bytes([
                header[7], header[8], header[9], header[10],
            ]));
            let total = HEADER_SIZE as u64 + len + CRC_SIZE as u64;
            if offset + total > size {
                break;
            }

            let record = backend.read_at(offset, total as usize)?;
            let (body, crc_bytes) = record.split_at(record.len() - CRC_SIZE);
            let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
            let actual = crc32(body);
            if expected != actual {
                return Err(CoreError::ChecksumMismatch { expected, actual });
            }

            let entry: JournalEntry = serde_json::from_slice(&body[HEADER_SIZE..])?;
            if entry.record_type() != record_type {
                return Err(CoreError::journal_corruption(format!(
                    "record type {record_type:?} does not match payload at offset {offset}"
                )));
            }
            entries.push(entry);
            offset += total;
        }

        if offset < size {
            warn!(
                "dropping {} torn bytes at the end of the journal",
                size - offset
            );
            backend.truncate(offset)?;
        }

        Ok(entries)
    }

    /// Replaces the journal contents with exactly `entries`, then syncs.
    ///
    /// A file journal is rewritten into a sibling file that is synced and
    /// renamed over the original, so a failure leaves the old journal in
    /// place. Other backends are rewritten in place; if that fails the
    /// previous contents are written back.
    pub fn rewrite(&self, entries: &[JournalEntry]) -> CoreResult<()> {
        let mut encoded = Vec::new();
        for entry in entries {
            encoded.extend_from_slice(&entry.encode()?);
        }
        let mut backend = self.backend.lock();

        let Some(path) = &self.path else {
            let size = backend.size()?;
            let previous = backend.read_at(0, size as usize)?;
            backend.truncate(0)?;
            if let Err(err) = write_synced(&mut **backend, &encoded) {
                warn!("journal rewrite failed, restoring {size} bytes: {err}");
                backend.truncate(0)?;
                write_synced(&mut **backend, &previous)?;
                return Err(err.into());
            }
            return Ok(());
        };

        let temp = path.with_extension(COMPACT_EXTENSION);
        match fs::remove_file(&temp) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let mut fresh = FileBackend::open(&temp)?;
        if let Err(err) = write_synced(&mut fresh, &encoded) {
            drop(fresh);
            let _ = fs::remove_file(&temp);
            return Err(err.into());
        }
        fs::rename(&temp, path)?;
        // appends are serialized by the lock, so nothing lands in the old file
        *backend = Box::new(fresh);
        Ok(())
    }

    /// Syncs buffered appends to stable storage.
    pub fn sync(&self) -> CoreResult<()> {
        Ok(self.backend.lock().sync()?)
    }

    /// Current size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }
}

fn write_synced(backend: &mut dyn StorageBackend, data: &[u8]) -> StorageResult<()> {
    if !data.is_empty() {
        backend.append(data)?;
    }
    backend.sync()
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.path)
            .field("size", &self.size().ok())
            .finish()
    }
}

/// CRC-32 (IEEE, reflected polynomial `0xEDB88320`).
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut n = 0;
        while n < 256 {
            let mut c = n as u32;
            let mut k = 0;
            while k < 8 {
                c = if c & 1 == 1 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
                k += 1;
            }
            table[n] = c;
            n += 1;
        }
        table
    };

    !data.iter().fold(!0u32, |crc, &byte| {
        TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
    })
}
