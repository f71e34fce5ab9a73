//! Heterogeneous write collections for batch and transactional writes.

use crate::client::WriteRequest;

use super::expression::Condition;
use super::key_set::{ErasedEntry, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchWriteKind {
    Save,
    DeleteKey,
    DeleteItem,
}

#[derive(Debug)]
pub(crate) struct BatchWriteOp {
    pub(crate) kind: BatchWriteKind,
    pub(crate) entry: ErasedEntry,
}

/// Saves and deletes applied with batch-write calls.
///
/// Batch writes always clobber: no conditions, no version checks.
#[derive(Debug, Default)]
pub struct BatchWriteSet {
    ops: Vec<BatchWriteOp>,
}

impl BatchWriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn save<I: Record>(mut self, item: I) -> Self {
        self.push(BatchWriteKind::Save, item);
        self
    }

    #[must_use]
    pub fn delete_key<K: Record>(mut self, key: K) -> Self {
        self.push(BatchWriteKind::DeleteKey, key);
        self
    }

    /// Delete the item's primary key; the rest of the item is ignored.
    #[must_use]
    pub fn delete<I: Record>(mut self, item: I) -> Self {
        self.push(BatchWriteKind::DeleteItem, item);
        self
    }

    /// Queue a save of every item.
    #[must_use]
    pub fn save_all<I: Record>(mut self, items: impl IntoIterator<Item = I>) -> Self {
        for item in items {
            self.push(BatchWriteKind::Save, item);
        }
        self
    }

    fn push<T: Record>(&mut self, kind: BatchWriteKind, value: T) {
        self.ops.push(BatchWriteOp {
            kind,
            entry: ErasedEntry::new(value),
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn ops(&self) -> &[BatchWriteOp] {
        &self.ops
    }
}

/// A write the store did not process within the retry budget.
#[derive(Debug, Clone, PartialEq)]
pub struct UnprocessedWrite {
    /// Position of the operation in its [`BatchWriteSet`].
    pub index: usize,
    pub request: WriteRequest,
}

/// Outcome of a batch write. Unprocessed writes are not an error; check
/// [`is_complete`](Self::is_complete).
#[must_use = "batch writes can leave operations unprocessed"]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchWriteResult {
    /// Positions of the applied operations, in the order they were applied.
    pub processed: Vec<usize>,
    pub unprocessed: Vec<UnprocessedWrite>,
}

impl BatchWriteResult {
    pub fn is_complete(&self) -> bool {
        self.unprocessed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionKind {
    Save,
    DeleteKey,
    DeleteItem,
    ConditionCheck,
}

#[derive(Debug)]
pub(crate) struct TransactionOp {
    pub(crate) kind: TransactionKind,
    pub(crate) entry: ErasedEntry,
    pub(crate) condition: Option<Condition>,
}

/// Writes and condition checks applied atomically.
///
/// At most 25 operations and 4MB, no two on the same item, and no item types
/// with a version attribute.
#[derive(Debug, Default)]
pub struct TransactionWriteSet {
    ops: Vec<TransactionOp>,
}

impl TransactionWriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn save<I: Record>(self, item: I) -> Self {
        self.push(TransactionKind::Save, item, None)
    }

    #[must_use]
    pub fn save_if<I: Record>(self, item: I, condition: Condition) -> Self {
        self.push(TransactionKind::Save, item, Some(condition))
    }

    #[must_use]
    pub fn delete_key<K: Record>(self, key: K) -> Self {
        self.push(TransactionKind::DeleteKey, key, None)
    }

    #[must_use]
    pub fn delete_key_if<K: Record>(self, key: K, condition: Condition) -> Self {
        self.push(TransactionKind::DeleteKey, key, Some(condition))
    }

    #[must_use]
    pub fn delete<I: Record>(self, item: I) -> Self {
        self.push(TransactionKind::DeleteItem, item, None)
    }

    #[must_use]
    pub fn delete_if<I: Record>(self, item: I, condition: Condition) -> Self {
        self.push(TransactionKind::DeleteItem, item, Some(condition))
    }

    /// Require `condition` to hold on the item under `key` without writing it.
    #[must_use]
    pub fn condition_check<K: Record>(self, key: K, condition: Condition) -> Self {
        self.push(TransactionKind::ConditionCheck, key, Some(condition))
    }

    fn push<T: Record>(
        mut self,
        kind: TransactionKind,
        value: T,
        condition: Option<Condition>,
    ) -> Self {
        self.ops.push(TransactionOp {
            kind,
            entry: ErasedEntry::new(value),
            condition,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn ops(&self) -> &[TransactionOp] {
        &self.ops
    }
}
