//! Error types for all LogicalDB operations.

use thiserror::Error;

use crate::types::KeyType;

/// Top-level error type for LogicalDB operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A single-item save or delete condition was not satisfied.
    #[error("conditional check failed on table '{table}'")]
    ConditionalCheckFailed { table: String },

    /// Keys were still unprocessed after the batch retry budget ran out.
    #[error("batch load left {unprocessed} key(s) unprocessed after {attempts} attempt(s)")]
    BatchLoadIncomplete { unprocessed: usize, attempts: u32 },
}

/// A typed view could not be resolved to a physical table or index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("invalid table descriptor for '{table}': {reason}")]
    InvalidDescriptor { table: String, reason: String },

    #[error("index '{index}' is not declared on table '{table}'")]
    IndexNotFound { table: String, index: String },

    #[error("key type {type_name} is not bound to any table")]
    UnboundKeyType { type_name: &'static str },

    #[error("item type {type_name} is not bound to any table")]
    UnboundItemType { type_name: &'static str },

    #[error("key type {type_name} is bound to more than one view: {}", views.join(", "))]
    AmbiguousKeyType {
        type_name: &'static str,
        views: Vec<String>,
    },

    #[error("item type {type_name} is bound to more than one view: {}", views.join(", "))]
    AmbiguousItemType {
        type_name: &'static str,
        views: Vec<String>,
    },
}

/// Errors surfaced by a [`StoreClient`](crate::client::StoreClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out")]
    Timeout,

    #[error("the conditional request failed")]
    ConditionalCheckFailed,

    /// The whole transaction was cancelled. `reasons` is aligned with the
    /// submitted operations; `None` means that operation was not at fault.
    #[error("transaction cancelled")]
    TransactionCanceled { reasons: Vec<Option<String>> },

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl StoreError {
    /// Whether the batch engine may retry the call that produced this error.
    ///
    /// Cancellation and timeouts belong to the caller and are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Throttled(_) | StoreError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("NaN is not a valid key value")]
    NaN,

    #[error("number key value {0} cannot be stored exactly")]
    InexactNumber(String),

    #[error("item exceeds maximum size of {max} bytes (got {actual})")]
    ItemTooLarge { max: usize, actual: usize },

    #[error("invalid key type tag: {0}")]
    InvalidTypeTag(u8),

    #[error("malformed encoded key")]
    MalformedKey,

    #[error("key exceeds maximum size of {max} bytes (got {actual})")]
    KeyTooLarge { max: usize, actual: usize },

    #[error("{type_name} does not serialize to an attribute map")]
    NotAnObject { type_name: &'static str },

    #[error("failed to serialize {type_name}: {reason}")]
    Serialize {
        type_name: &'static str,
        reason: String,
    },

    #[error("failed to deserialize {type_name}: {reason}")]
    Deserialize {
        type_name: &'static str,
        reason: String,
    },

    #[error("MessagePack encoding error: {0}")]
    MessagePack(String),
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("key type mismatch for attribute '{name}': expected {expected:?}, got {actual:?}")]
    KeyTypeMismatch {
        name: String,
        expected: KeyType,
        actual: KeyType,
    },

    #[error("missing key attribute: {0}")]
    MissingKeyAttribute(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("version attribute '{0}' is not a non-negative integer")]
    InvalidVersion(String),
}

/// Local precondition failures and store-side aborts of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("transaction contains {count} operations (max {max})")]
    TooManyItems { count: usize, max: usize },

    #[error("transaction payload of {actual} bytes exceeds {max} bytes")]
    TooLarge { max: usize, actual: usize },

    #[error("operation {index} targets an item already used by operation {first} in table '{table}'")]
    DuplicateTarget {
        table: String,
        first: usize,
        index: usize,
    },

    #[error("{type_name} declares version attribute '{attribute}'; transactions do not support versioning")]
    VersioningUnsupported {
        type_name: &'static str,
        attribute: String,
    },

    #[error("transaction aborted{}: {reason}", index.map(|i| format!(" at operation {i}")).unwrap_or_default())]
    Aborted {
        index: Option<usize>,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("start and end keys address different partitions")]
    PartitionMismatch,

    #[error("sort key not supported on this key schema")]
    SortKeyNotSupported,

    #[error("consistent reads are not supported on global secondary index '{0}'")]
    ConsistentReadOnGlobalIndex(String),

    #[error("page size must be greater than zero")]
    InvalidPageSize,

    #[error("parallel scan needs at least one segment")]
    InvalidSegmentCount,
}

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;
