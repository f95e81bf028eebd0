//! Import command implementation.

use super::ClusterArgs;
use doctx_core::{Collection, CoreError};
use serde_json::Value;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Failure of a bulk import.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The input is not a JSON array.
    #[error("input must be a JSON array of documents")]
    NotAList,
    /// An element has no usable key.
    #[error("element {index} has no string or number field {field:?}")]
    MissingKey {
        /// Position in the array.
        index: usize,
        /// Key field that was looked up.
        field: String,
    },
    /// Writing a document failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Runs the import command.
pub fn run(
    args: &ClusterArgs,
    file: &Path,
    collection: &str,
    key_field: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read_to_string(file)?;
    let list: Value = serde_json::from_str(&data)?;

    let cluster = args.connect()?;
    let target = cluster.bucket(&args.bucket)?.collection(collection);
    let imported = import(&target, &list, key_field);
    cluster.close()?;

    let count = imported?;
    println!(
        "✓ Imported {count} document(s) into {}/{collection}",
        args.bucket
    );
    Ok(())
}

/// Upserts every element of `list`, keyed by its `key_field`.
///
/// Keys are validated before anything is written.
pub fn import(collection: &Collection, list: &Value, key_field: &str) -> Result<usize, ImportError> {
    let items = list.as_array().ok_or(ImportError::NotAList)?;
    let keys = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            document_key(item, key_field).ok_or_else(|| ImportError::MissingKey {
                index,
                field: key_field.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    for (key, item) in keys.iter().zip(items) {
        collection.upsert(key, item)?;
        debug!("imported {key}");
    }
    Ok(items.len())
}

fn document_key(item: &Value, key_field: &str) -> Option<String> {
    match item.get(key_field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
