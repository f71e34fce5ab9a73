//! Public API: binding factory, typed views, pagination, and the batch and
//! transaction engines.

mod batch;
pub mod binding;
pub mod database;
pub mod expression;
pub mod key_set;
pub mod key_utils;
pub mod page;
mod transaction;
pub mod view;
pub mod write_set;

pub use binding::{LogicalDbFactory, LogicalDbType, LogicalTableType, ViewBinding};
pub use database::LogicalDb;
pub use expression::Condition;
pub use key_set::{ItemSet, KeySet, LoadedItem, Record};
pub use page::{Offset, Page, QueryOptions};
pub use view::{
    InlineView, Loader, LogicalTable, Queryable, Scannable, SecondaryIndex, View, WriteOptions,
    Writer,
};
pub use write_set::{BatchWriteResult, BatchWriteSet, TransactionWriteSet, UnprocessedWrite};
