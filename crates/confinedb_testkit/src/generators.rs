//! Property-based test generators using proptest.
//!
//! Provides strategies for generating configurations, keys and
//! operation sequences for lifecycle and store tests.

use confinedb_core::{Configuration, SchemaIdentity, KEY_SIZE};
use proptest::prelude::*;
use std::path::PathBuf;

/// Strategy for generating valid 64-byte encryption keys.
pub fn encryption_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), KEY_SIZE)
}

/// Strategy for generating object type names.
pub fn type_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-zA-Z0-9]{0,11}").expect("Invalid regex")
}

/// Strategy for generating schema identities of up to four types.
pub fn schema_strategy() -> impl Strategy<Value = SchemaIdentity> {
    prop::collection::btree_set(type_name_strategy(), 0..4).prop_map(SchemaIdentity::new)
}

/// Strategy for generating configurations on `path`.
///
/// Varies every field that takes part in conflict detection.
pub fn configuration_strategy(path: PathBuf) -> impl Strategy<Value = Configuration> {
    (
        prop::option::of(encryption_key_strategy()),
        0..4u64,
        schema_strategy(),
    )
        .prop_map(move |(key, schema_version, schema)| {
            let mut builder = Configuration::builder(path.clone())
                .in_memory()
                .schema_version(schema_version)
                .schema(schema);
            if let Some(key) = key {
                builder = builder.encryption_key(key);
            }
            builder.build().expect("Generated configuration should build")
        })
}

/// Strategy for generating store keys from a small alphabet, so that
/// operations in one sequence collide.
pub fn store_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::string::string_regex("[a-d]{1,2}")
        .expect("Invalid regex")
        .prop_map(String::into_bytes)
}

/// Strategy for generating store values (arbitrary bytes).
pub fn store_value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// An operation against an open store.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Put a value
    Put {
        /// Key
        key: Vec<u8>,
        /// Value
        value: Vec<u8>,
    },
    /// Delete a key
    Delete {
        /// Key
        key: Vec<u8>,
    },
    /// Read a key
    Get {
        /// Key
        key: Vec<u8>,
    },
}

/// Strategy for generating store operations.
pub fn store_operation_strategy() -> impl Strategy<Value = StoreOperation> {
    prop_oneof![
        3 => (store_key_strategy(), store_value_strategy())
            .prop_map(|(key, value)| StoreOperation::Put { key, value }),
        1 => store_key_strategy().prop_map(|key| StoreOperation::Delete { key }),
        2 => store_key_strategy().prop_map(|key| StoreOperation::Get { key }),
    ]
}

/// Strategy for generating a sequence of store operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<StoreOperation>> {
    prop::collection::vec(store_operation_strategy(), min_ops..max_ops)
}

/// An open or close issued by one of several threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOperation {
    /// Open the store on a thread
    Open {
        /// Thread index
        thread: usize,
    },
    /// Close the store on a thread
    Close {
        /// Thread index
        thread: usize,
    },
}

impl LifecycleOperation {
    /// The index of the thread issuing the operation.
    pub fn thread(self) -> usize {
        match self {
            Self::Open { thread } | Self::Close { thread } => thread,
        }
    }
}

/// Strategy for generating open/close sequences over `threads` threads.
pub fn lifecycle_sequence_strategy(
    threads: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<LifecycleOperation>> {
    let op = prop_oneof![
        (0..threads).prop_map(|thread| LifecycleOperation::Open { thread }),
        (0..threads).prop_map(|thread| LifecycleOperation::Close { thread }),
    ];
    prop::collection::vec(op, 0..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
