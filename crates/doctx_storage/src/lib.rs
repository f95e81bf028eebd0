//! # doctx storage
//!
//! Byte stores underneath the doctx node journals.
//!
//! A backend knows nothing about documents, journals or transactions. It
//! offers positional reads, appends at the tail, and two strengths of
//! flushing:
//!
//! - [`StorageBackend::flush`] hands buffered bytes to the operating system
//! - [`StorageBackend::sync`] waits until they are on stable media
//!
//! The distinction matters to `doctx_core`, where durability levels decide
//! which replica copies must be synced before a write is acknowledged.
//!
//! ## Backends
//!
//! - [`InMemoryBackend`] for ephemeral clusters and tests
//! - [`FileBackend`] for clusters opened on a data directory
//!
//! ```rust
//! use doctx_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"journal bytes").unwrap();
//! assert_eq!(backend.read_at(offset, 7).unwrap(), b"journal");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
