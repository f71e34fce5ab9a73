//! Core types: store limits, key definitions, table and index descriptors.

use serde::{Deserialize, Serialize};

/// An attribute map as exchanged with the store.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Maximum item size in bytes (400KB, matching DynamoDB).
pub const MAX_ITEM_SIZE: usize = 400 * 1024;

/// Maximum partition key size in bytes (2048, matching DynamoDB).
pub const MAX_PARTITION_KEY_SIZE: usize = 2048;

/// Maximum sort key size in bytes (1024, matching DynamoDB).
pub const MAX_SORT_KEY_SIZE: usize = 1024;

/// Maximum put/delete requests in a single batch-write call.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Maximum payload of a single batch-write call (16MB).
pub const MAX_BATCH_WRITE_BYTES: usize = 16 * 1024 * 1024;

/// Maximum keys in a single batch-get call.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// Maximum operations in a single transaction.
pub const MAX_TRANSACTION_ITEMS: usize = 25;

/// Maximum payload of a single transaction (4MB).
pub const MAX_TRANSACTION_BYTES: usize = 4 * 1024 * 1024;

/// Maximum payload of a single query or scan response (1MB).
pub const MAX_QUERY_RESPONSE_BYTES: usize = 1024 * 1024;

/// The type of a key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    String,
    Number,
    Binary,
}

/// A key attribute definition (name + type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDefinition {
    pub name: String,
    pub key_type: KeyType,
}

impl KeyDefinition {
    pub fn new(name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            name: name.into(),
            key_type,
        }
    }
}

/// Read consistency requested from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistentReads {
    #[default]
    Eventual,
    Consistent,
}

impl ConsistentReads {
    pub fn is_consistent(self) -> bool {
        self == ConsistentReads::Consistent
    }
}

/// How a secondary index is maintained by the store.
///
/// Local indexes share the table's partition key and can serve strongly
/// consistent reads; global indexes are always eventually consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    Global,
    Local,
}

/// A secondary index declared on a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub kind: IndexKind,
    pub partition_key: KeyDefinition,
    pub sort_key: Option<KeyDefinition>,
}

impl IndexDescriptor {
    /// A global secondary index keyed on `partition_key`.
    pub fn global(name: impl Into<String>, partition_key: KeyDefinition) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Global,
            partition_key,
            sort_key: None,
        }
    }

    /// A local secondary index; `partition_key` must be the table's own.
    pub fn local(name: impl Into<String>, partition_key: KeyDefinition) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Local,
            partition_key,
            sort_key: None,
        }
    }

    pub fn sort_key(mut self, sort_key: KeyDefinition) -> Self {
        self.sort_key = Some(sort_key);
        self
    }

    pub fn key_schema(&self) -> KeySchema<'_> {
        KeySchema {
            partition_key: &self.partition_key,
            sort_key: self.sort_key.as_ref(),
        }
    }
}

/// Static description of a physical table, registered at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub partition_key: KeyDefinition,
    pub sort_key: Option<KeyDefinition>,
    /// Attribute holding the optimistic-concurrency version of the table's
    /// own item type, if it is versioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_attribute: Option<String>,
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, partition_key: KeyDefinition) -> Self {
        Self {
            name: name.into(),
            partition_key,
            sort_key: None,
            version_attribute: None,
            indexes: Vec::new(),
        }
    }

    pub fn sort_key(mut self, sort_key: KeyDefinition) -> Self {
        self.sort_key = Some(sort_key);
        self
    }

    pub fn version_attribute(mut self, name: impl Into<String>) -> Self {
        self.version_attribute = Some(name.into());
        self
    }

    pub fn index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn find_index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|idx| idx.name == name)
    }

    pub fn key_schema(&self) -> KeySchema<'_> {
        KeySchema {
            partition_key: &self.partition_key,
            sort_key: self.sort_key.as_ref(),
        }
    }
}

/// The key attributes of a table or index.
#[derive(Debug, Clone, Copy)]
pub struct KeySchema<'a> {
    pub partition_key: &'a KeyDefinition,
    pub sort_key: Option<&'a KeyDefinition>,
}
