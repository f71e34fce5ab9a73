//! The bound logical database: typed tables plus cross-table batch and
//! transaction operations.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::{BindingError, Result};
use crate::types::ConsistentReads;

use super::batch;
use super::binding::{Context, LogicalDbFactory, LogicalTableType};
use super::key_set::{ItemSet, KeySet, Record};
use super::transaction;
use super::write_set::{BatchWriteResult, BatchWriteSet, TransactionWriteSet};

/// A bound [`LogicalDbType`](super::LogicalDbType).
///
/// Dereferences to the user's table struct, so `db.music.albums.load(..)`
/// reads naturally. Cloning is cheap: the store client and bindings are
/// shared.
#[derive(Clone)]
pub struct LogicalDb<DB> {
    tables: DB,
    ctx: Arc<Context>,
}

impl<DB> LogicalDb<DB> {
    pub(crate) fn new(tables: DB, ctx: Arc<Context>) -> Self {
        Self { tables, ctx }
    }

    pub fn tables(&self) -> &DB {
        &self.tables
    }

    /// Bind another logical table over the same store and registry, or
    /// return the instance already bound.
    pub fn logical_table<T: LogicalTableType>(&self) -> std::result::Result<T, BindingError> {
        LogicalDbFactory::from_context(Arc::clone(&self.ctx)).logical_table()
    }

    /// Load every key in the set with batch-get calls.
    ///
    /// Keys may span tables. Missing keys are simply absent from the result.
    /// Fails with [`Error::BatchLoadIncomplete`](crate::Error::BatchLoadIncomplete)
    /// if the store keeps returning unprocessed keys past the retry budget.
    pub fn batch_load(&self, keys: &KeySet, consistency: ConsistentReads) -> Result<ItemSet> {
        batch::batch_load(&self.ctx, keys, consistency)
    }

    /// [`batch_load`](Self::batch_load) for keys of a single type.
    pub fn batch_load_keys<K: Record>(
        &self,
        keys: impl IntoIterator<Item = K>,
        consistency: ConsistentReads,
    ) -> Result<ItemSet> {
        self.batch_load(&keys.into_iter().collect(), consistency)
    }

    /// Apply the writes with batch-write calls. Version attributes are
    /// ignored and every save clobbers.
    pub fn batch_write(&self, writes: &BatchWriteSet) -> Result<BatchWriteResult> {
        batch::batch_write(&self.ctx, writes)
    }

    /// Read up to 25 keys as one consistent snapshot.
    pub fn transaction_load(&self, keys: &KeySet) -> Result<ItemSet> {
        transaction::transaction_load(&self.ctx, keys)
    }

    /// [`transaction_load`](Self::transaction_load) for keys of a single type.
    pub fn transaction_load_keys<K: Record>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<ItemSet> {
        self.transaction_load(&keys.into_iter().collect())
    }

    /// Apply every operation atomically, or none of them.
    pub fn transaction_write(&self, writes: &TransactionWriteSet) -> Result<()> {
        transaction::transaction_write(&self.ctx, writes)
    }
}

impl<DB> Deref for LogicalDb<DB> {
    type Target = DB;

    fn deref(&self) -> &DB {
        &self.tables
    }
}

impl<DB> fmt::Debug for LogicalDb<DB> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalDb")
            .field("tables", &std::any::type_name::<DB>())
            .finish_non_exhaustive()
    }
}
