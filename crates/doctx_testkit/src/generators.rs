//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random documents, keys and
//! operation sequences.

use proptest::prelude::*;
use serde_json::{Map, Value};

/// Strategy for generating document keys.
pub fn document_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_:-]{0,23}").expect("Invalid regex")
}

/// Strategy for generating valid bucket and collection names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for JSON scalars.
pub fn json_scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        (-1.0e6f64..1.0e6).prop_map(Value::from),
        "[ -~]{0,16}".prop_map(Value::String),
    ]
}

/// Strategy for arbitrary JSON values nested up to three levels.
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    json_scalar_strategy().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-zA-Z]{1,8}", inner, 0..6)
                .prop_map(|fields| Value::Object(fields.into_iter().collect())),
        ]
    })
}

/// Strategy for JSON documents (objects at the top level).
pub fn document_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-zA-Z]{1,8}", json_value_strategy(), 0..8)
        .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map<_, _>>()))
}

/// A single step of a generated transaction.
#[derive(Debug, Clone)]
pub enum DocumentOperation {
    /// Insert a document
    Insert {
        /// Document key
        key: String,
        /// Document content
        content: Value,
    },
    /// Replace a document
    Replace {
        /// Document key
        key: String,
        /// Document content
        content: Value,
    },
    /// Remove a document
    Remove {
        /// Document key
        key: String,
    },
    /// Read a document
    Get {
        /// Document key
        key: String,
    },
}

impl DocumentOperation {
    /// Key the operation targets.
    pub fn key(&self) -> &str {
        match self {
            Self::Insert { key, .. }
            | Self::Replace { key, .. }
            | Self::Remove { key }
            | Self::Get { key } => key,
        }
    }
}

/// Strategy for one operation on a key drawn from `keys`.
pub fn operation_strategy(keys: Vec<String>) -> impl Strategy<Value = DocumentOperation> {
    let key = prop::sample::select(keys);
    prop_oneof![
        (key.clone(), document_strategy())
            .prop_map(|(key, content)| DocumentOperation::Insert { key, content }),
        (key.clone(), document_strategy())
            .prop_map(|(key, content)| DocumentOperation::Replace { key, content }),
        key.clone().prop_map(|key| DocumentOperation::Remove { key }),
        key.prop_map(|key| DocumentOperation::Get { key }),
    ]
}

/// Strategy for a sequence of operations over a small key space, so that
/// operations collide.
pub fn operation_sequence_strategy(
    key_space: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<DocumentOperation>> {
    let keys: Vec<String> = (0..key_space.max(1)).map(|i| format!("k{i}")).collect();
    prop::collection::vec(operation_strategy(keys), 1..=max_len.max(1))
}
