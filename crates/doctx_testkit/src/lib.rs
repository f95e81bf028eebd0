//! # doctx Testkit
//!
//! Test utilities for doctx.
//!
//! This crate provides:
//! - Cluster fixtures, in memory or backed by a temporary directory
//! - Property-based generators for JSON documents and keys
//! - A harness that checks transactional writes against a shadow model
//! - A threaded stress test that checks atomicity under contention
//!
//! ## Usage
//!
//! ```rust,ignore
//! use doctx_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_cluster() {
//!     with_temp_cluster(|cluster| {
//!         let collection = cluster.bucket("test").unwrap().default_collection();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
