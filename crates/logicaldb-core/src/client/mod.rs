//! The store client boundary.
//!
//! [`StoreClient`] is the capability surface the typed layer needs from the
//! underlying store: single-item reads and writes, batch get/write,
//! transactional get/write, query, scan, and count. Implementations own the
//! wire protocol, connection handling, and per-call timeouts; this crate only
//! reacts to their results.
//!
//! [`MemoryStore`] is a local implementation used for tests and embedding.

pub mod memory;

use std::ops::Bound;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::expression::Condition;
use crate::error::StoreError;
use crate::types::{ConsistentReads, Document};

pub use memory::MemoryStore;

/// Result type alias for client operations.
pub type ClientResult<T> = std::result::Result<T, StoreError>;

/// A primary key addressed in a specific table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableKey {
    pub table: String,
    pub key: Document,
}

#[derive(Debug, Clone, Default)]
pub struct BatchGetRequest {
    pub keys: Vec<TableKey>,
    pub consistency: ConsistentReads,
}

#[derive(Debug, Clone, Default)]
pub struct BatchGetOutput {
    /// Items found, tagged with their table. Order is unspecified.
    pub items: Vec<(String, Document)>,
    pub unprocessed_keys: Vec<TableKey>,
}

/// One put or delete inside a batch-write call. No conditions are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteRequest {
    Put { table: String, item: Document },
    Delete { table: String, key: Document },
}

impl WriteRequest {
    pub fn table(&self) -> &str {
        match self {
            WriteRequest::Put { table, .. } | WriteRequest::Delete { table, .. } => table,
        }
    }

    /// The attribute map carried by the request (item for puts, key for deletes).
    pub fn document(&self) -> &Document {
        match self {
            WriteRequest::Put { item, .. } => item,
            WriteRequest::Delete { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchWriteRequest {
    pub operations: Vec<WriteRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchWriteOutput {
    pub unprocessed: Vec<WriteRequest>,
}

/// One action of a transactional write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransactWriteOp {
    Put {
        table: String,
        item: Document,
        condition: Option<Condition>,
    },
    Delete {
        table: String,
        key: Document,
        condition: Option<Condition>,
    },
    ConditionCheck {
        table: String,
        key: Document,
        condition: Condition,
    },
}

impl TransactWriteOp {
    pub fn table(&self) -> &str {
        match self {
            TransactWriteOp::Put { table, .. }
            | TransactWriteOp::Delete { table, .. }
            | TransactWriteOp::ConditionCheck { table, .. } => table,
        }
    }
}

/// Sort key bounds of a query. Both bounds apply to the same partition.
#[derive(Debug, Clone, PartialEq)]
pub struct SortRange {
    pub lower: Bound<Value>,
    pub upper: Bound<Value>,
}

impl SortRange {
    pub fn unbounded() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub table: String,
    /// Query this index instead of the table's primary key.
    pub index: Option<String>,
    pub partition_value: Value,
    pub sort_range: SortRange,
    pub consistency: ConsistentReads,
    pub scan_forward: bool,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Document>,
}

/// A parallel scan segment: `segment` of `total_segments`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub segment: u32,
    pub total_segments: u32,
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub table: String,
    pub index: Option<String>,
    pub segment: Option<Segment>,
    pub consistency: ConsistentReads,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Document>,
}

impl ScanRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            index: None,
            segment: None,
            consistency: ConsistentReads::Eventual,
            limit: None,
            exclusive_start_key: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub items: Vec<Document>,
    /// Present when more items remain after this response.
    pub last_evaluated_key: Option<Document>,
}

#[derive(Debug, Clone, Default)]
pub struct CountOutput {
    pub count: u64,
    pub last_evaluated_key: Option<Document>,
}

/// Operations the typed layer needs from a key-value store.
///
/// Implementations must be safe to share across threads; parallel scans call
/// [`StoreClient::scan`] concurrently.
pub trait StoreClient: Send + Sync {
    fn get_item(
        &self,
        table: &str,
        key: &Document,
        consistency: ConsistentReads,
    ) -> ClientResult<Option<Document>>;

    /// Replace the whole item. Fails with
    /// [`StoreError::ConditionalCheckFailed`] if `condition` does not hold.
    fn put_item(
        &self,
        table: &str,
        item: Document,
        condition: Option<&Condition>,
    ) -> ClientResult<()>;

    fn delete_item(
        &self,
        table: &str,
        key: &Document,
        condition: Option<&Condition>,
    ) -> ClientResult<()>;

    /// At most 100 keys per call.
    fn batch_get(&self, request: BatchGetRequest) -> ClientResult<BatchGetOutput>;

    /// At most 25 operations and 16MB per call.
    fn batch_write(&self, request: BatchWriteRequest) -> ClientResult<BatchWriteOutput>;

    /// Results are aligned with `keys`.
    fn transact_get(&self, keys: &[TableKey]) -> ClientResult<Vec<Option<Document>>>;

    /// All-or-nothing. Cancellation is reported as
    /// [`StoreError::TransactionCanceled`].
    fn transact_write(&self, operations: Vec<TransactWriteOp>) -> ClientResult<()>;

    /// At most 1MB of items per response.
    fn query(&self, request: &QueryRequest) -> ClientResult<QueryOutput>;

    fn scan(&self, request: &ScanRequest) -> ClientResult<QueryOutput>;

    fn count(&self, request: &ScanRequest) -> ClientResult<CountOutput>;
}
