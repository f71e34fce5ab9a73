//! Typed views over a physical table.
//!
//! Capabilities are split into small traits, [`Loader`], [`Writer`],
//! [`Queryable`] and [`Scannable`], and each view type implements exactly the
//! subset its role allows:
//!
//! | type                 | load/save/delete | query | scan/count |
//! |----------------------|------------------|-------|------------|
//! | [`LogicalTable`]     | yes              |       | yes        |
//! | [`InlineView`]       | yes              | yes   |            |
//! | [`SecondaryIndex`]   |                  | yes   | yes        |
//!
//! All of them share a [`ViewCore`] holding the resolved binding and the
//! store client.

use std::any::TypeId;
use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::client::{QueryOutput, QueryRequest, ScanRequest, Segment, SortRange};
use crate::error::{BindingError, Error, QueryError, Result, SchemaError, StoreError};
use crate::types::{ConsistentReads, Document, IndexKind, TableDescriptor};

use super::binding::{Context, ViewBinding};
use super::expression::Condition;
use super::key_set::Record;
use super::key_utils;
use super::page::{Offset, Page, QueryOptions};

/// Options of a single-item save or delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Caller condition, AND-ed with any version condition.
    pub condition: Option<Condition>,
    /// Skip the version check and leave the version attribute untouched.
    pub ignore_version_constraints: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn ignoring_versions(mut self) -> Self {
        self.ignore_version_constraints = true;
        self
    }
}

/// Point reads by primary key.
pub trait Loader<K, I> {
    /// The item stored under `key`, or `None` if there is none.
    fn load(&self, key: &K, consistency: ConsistentReads) -> Result<Option<I>>;
}

/// Full-item writes and deletes by primary key.
pub trait Writer<K, I> {
    /// Replace every attribute of the stored item, unmodeled ones included.
    ///
    /// Fails with [`Error::ConditionalCheckFailed`] when the caller
    /// condition or the version condition does not hold.
    fn save_with(&self, item: &I, options: WriteOptions) -> Result<()>;

    /// Delete by key. Keys carry no version, so only the caller condition
    /// applies.
    fn delete_key_with(&self, key: &K, options: WriteOptions) -> Result<()>;

    /// Delete by item, conditioned on the item's version if versioned.
    fn delete_with(&self, item: &I, options: WriteOptions) -> Result<()>;

    fn save(&self, item: &I) -> Result<()> {
        self.save_with(item, WriteOptions::default())
    }

    fn delete_key(&self, key: &K) -> Result<()> {
        self.delete_key_with(key, WriteOptions::default())
    }

    fn delete(&self, item: &I) -> Result<()> {
        self.delete_with(item, WriteOptions::default())
    }
}

/// Load, save and delete by key.
pub trait View<K, I>: Loader<K, I> + Writer<K, I> {}

impl<K, I, T> View<K, I> for T where T: Loader<K, I> + Writer<K, I> + ?Sized {}

/// Range queries within one partition.
pub trait Queryable<K, I> {
    /// Items with keys in `[start_inclusive, end_exclusive)` in ascending
    /// order, or in `(end_exclusive, start_inclusive]` in descending order.
    ///
    /// Both keys must address the same partition. A page holds at most
    /// `page_size` items and at most 1MB of data; its offset resumes the
    /// query where it stopped.
    fn query(
        &self,
        start_inclusive: &K,
        end_exclusive: &K,
        options: QueryOptions<K>,
    ) -> Result<Page<K, I>>;
}

/// Unbounded traversals. Every method reads the whole table or index and is
/// priced accordingly.
pub trait Scannable<K, I> {
    /// Every item, in a single page.
    fn scan(&self) -> Result<Page<K, I>>;

    /// One page of a scan, resuming after `offset`.
    fn scan_page(&self, page_size: usize, offset: Option<Offset<K>>) -> Result<Page<K, I>>;

    /// Scan with `threads` workers, one segment each. Returns one page per
    /// segment; there is no ordering across segments.
    fn parallel_scan(&self, threads: usize) -> Result<Vec<Page<K, I>>>;

    /// Number of items, without materializing them.
    fn count(&self) -> Result<u64>;
}

/// Binding plus store access, shared by every view type.
#[derive(Clone)]
pub(crate) struct ViewCore {
    binding: Arc<ViewBinding>,
    ctx: Arc<Context>,
}

impl ViewCore {
    pub(crate) fn new(binding: Arc<ViewBinding>, ctx: Arc<Context>) -> Self {
        Self { binding, ctx }
    }

    fn table_name(&self) -> &str {
        self.binding.table_name()
    }

    fn primary_key_of<T: Serialize>(&self, value: &T) -> Result<Document> {
        let doc = key_utils::to_document(value)?;
        key_utils::key_attributes(&doc, self.binding.primary_schema())
    }

    fn load<K: Serialize, I: DeserializeOwned>(
        &self,
        key: &K,
        consistency: ConsistentReads,
    ) -> Result<Option<I>> {
        let key = self.primary_key_of(key)?;
        let found = self
            .ctx
            .client
            .get_item(self.table_name(), &key, consistency)?;
        match found {
            Some(doc) => Ok(Some(key_utils::from_document(doc)?)),
            None => Ok(None),
        }
    }

    fn save<I: Serialize>(&self, item: &I, options: WriteOptions) -> Result<()> {
        let mut doc = key_utils::to_document(item)?;
        let mut condition = options.condition;
        if !options.ignore_version_constraints
            && let Some(attr) = self.binding.version_attribute()
        {
            let (check, next) = match current_version(&doc, attr)? {
                None => (Condition::not_exists(attr), 1),
                Some(v) => (
                    Condition::attr_eq(attr, v),
                    v.checked_add(1)
                        .ok_or_else(|| SchemaError::InvalidVersion(attr.to_string()))?,
                ),
            };
            condition = Condition::merge(condition, Some(check));
            doc.insert(attr.to_string(), Value::from(next));
        }
        key_utils::extract_key_values(&doc, self.binding.primary_schema())?;
        key_utils::validate_item_size(&doc)?;
        self.ctx
            .client
            .put_item(self.table_name(), doc, condition.as_ref())
            .map_err(|e| self.write_error(e))
    }

    fn delete_key<K: Serialize>(&self, key: &K, options: WriteOptions) -> Result<()> {
        let key = self.primary_key_of(key)?;
        self.delete_document(&key, options.condition)
    }

    fn delete_item<I: Serialize>(&self, item: &I, options: WriteOptions) -> Result<()> {
        let doc = key_utils::to_document(item)?;
        let mut condition = options.condition;
        if !options.ignore_version_constraints
            && let Some(attr) = self.binding.version_attribute()
        {
            let check = match current_version(&doc, attr)? {
                None => Condition::not_exists(attr),
                Some(v) => Condition::attr_eq(attr, v),
            };
            condition = Condition::merge(condition, Some(check));
        }
        let key = key_utils::key_attributes(&doc, self.binding.primary_schema())?;
        self.delete_document(&key, condition)
    }

    fn delete_document(&self, key: &Document, condition: Option<Condition>) -> Result<()> {
        self.ctx
            .client
            .delete_item(self.table_name(), key, condition.as_ref())
            .map_err(|e| self.write_error(e))
    }

    fn write_error(&self, err: StoreError) -> Error {
        match err {
            StoreError::ConditionalCheckFailed => Error::ConditionalCheckFailed {
                table: self.table_name().to_string(),
            },
            other => other.into(),
        }
    }

    fn check_consistency(&self, consistency: ConsistentReads) -> Result<()> {
        if let Some(idx) = self.binding.index()
            && idx.kind == IndexKind::Global
            && consistency.is_consistent()
        {
            return Err(QueryError::ConsistentReadOnGlobalIndex(idx.name.clone()).into());
        }
        Ok(())
    }

    fn query<K: Serialize, I: DeserializeOwned>(
        &self,
        start: &K,
        end: &K,
        options: QueryOptions<K>,
    ) -> Result<Page<K, I>> {
        let schema = self.binding.key_schema();
        let sort_key = schema.sort_key.ok_or(QueryError::SortKeyNotSupported)?;
        self.check_consistency(options.consistency)?;
        let page_size = options.page_size.unwrap_or(self.ctx.config.default_page_size);
        if page_size == 0 {
            return Err(QueryError::InvalidPageSize.into());
        }

        let start_doc = key_utils::to_document(start)?;
        let end_doc = key_utils::to_document(end)?;
        let (start_partition, _) = key_utils::extract_key_values(&start_doc, schema)?;
        let (end_partition, _) = key_utils::extract_key_values(&end_doc, schema)?;
        if start_partition != end_partition {
            return Err(QueryError::PartitionMismatch.into());
        }

        let attr = |doc: &Document, name: &str| {
            doc.get(name)
                .cloned()
                .ok_or_else(|| SchemaError::MissingKeyAttribute(name.to_string()))
        };
        let start_sort = attr(&start_doc, &sort_key.name)?;
        let end_sort = attr(&end_doc, &sort_key.name)?;
        let sort_range = if options.asc {
            SortRange {
                lower: Bound::Included(start_sort),
                upper: Bound::Excluded(end_sort),
            }
        } else {
            SortRange {
                lower: Bound::Excluded(end_sort),
                upper: Bound::Included(start_sort),
            }
        };

        let request = QueryRequest {
            table: self.table_name().to_string(),
            index: self.binding.index_name().map(str::to_string),
            partition_value: attr(&start_doc, &schema.partition_key.name)?,
            sort_range,
            consistency: options.consistency,
            scan_forward: options.asc,
            limit: Some(page_size),
            exclusive_start_key: options.initial_offset.map(Offset::into_document),
        };
        let output = self.ctx.client.query(&request)?;
        debug!(
            table = %request.table,
            index = ?request.index,
            items = output.items.len(),
            more = output.last_evaluated_key.is_some(),
            "query page"
        );
        self.page(output)
    }

    fn page<K, I: DeserializeOwned>(&self, output: QueryOutput) -> Result<Page<K, I>> {
        let contents = output
            .items
            .into_iter()
            .map(key_utils::from_document)
            .collect::<std::result::Result<Vec<I>, _>>()?;
        Ok(Page::new(
            contents,
            output.last_evaluated_key.map(Offset::from_document),
        ))
    }

    fn scan_request(
        &self,
        segment: Option<Segment>,
        limit: Option<usize>,
        start: Option<Document>,
    ) -> ScanRequest {
        let mut request = ScanRequest::new(self.table_name());
        request.index = self.binding.index_name().map(str::to_string);
        request.segment = segment;
        request.limit = limit;
        request.exclusive_start_key = start;
        request
    }

    fn scan_page<K, I: DeserializeOwned>(
        &self,
        segment: Option<Segment>,
        page_size: usize,
        offset: Option<Offset<K>>,
    ) -> Result<Page<K, I>> {
        if page_size == 0 {
            return Err(QueryError::InvalidPageSize.into());
        }
        let request = self.scan_request(
            segment,
            Some(page_size),
            offset.map(Offset::into_document),
        );
        let output = self.ctx.client.scan(&request)?;
        self.page(output)
    }

    fn scan_all<K, I: DeserializeOwned>(&self, segment: Option<Segment>) -> Result<Page<K, I>> {
        let mut contents = Vec::new();
        let mut offset = None;
        loop {
            let page: Page<K, I> =
                self.scan_page(segment, self.ctx.config.scan_page_size, offset)?;
            contents.extend(page.contents);
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        debug!(
            table = %self.table_name(),
            index = ?self.binding.index_name(),
            segment = ?segment.map(|s| s.segment),
            items = contents.len(),
            "scan complete"
        );
        Ok(Page::new(contents, None))
    }

    fn parallel_scan<K: Record, I: Record>(&self, threads: usize) -> Result<Vec<Page<K, I>>> {
        let total = u32::try_from(threads)
            .ok()
            .filter(|&n| n > 0)
            .ok_or(QueryError::InvalidSegmentCount)?;
        std::thread::scope(|scope| {
            let workers: Vec<_> = (0..total)
                .map(|segment| {
                    scope.spawn(move || {
                        self.scan_all::<K, I>(Some(Segment {
                            segment,
                            total_segments: total,
                        }))
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| {
                    worker
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect::<Result<Vec<_>>>()
        })
    }

    fn count(&self) -> Result<u64> {
        let mut total = 0u64;
        let mut start = None;
        loop {
            let request = self.scan_request(None, None, start);
            let output = self.ctx.client.count(&request)?;
            total += output.count;
            match output.last_evaluated_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }
        Ok(total)
    }
}

/// The stored version of `doc`, if it carries one.
fn current_version(doc: &Document, attr: &str) -> Result<Option<u64>> {
    match doc.get(attr) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| SchemaError::InvalidVersion(attr.to_string()).into()),
    }
}

/// The root view of a logical table, over its root item type `RI`.
///
/// Also mints [`InlineView`]s and [`SecondaryIndex`]es over the same
/// physical table.
pub struct LogicalTable<RI> {
    core: ViewCore,
    _item: PhantomData<fn() -> RI>,
}

impl<RI> Clone for LogicalTable<RI> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _item: PhantomData,
        }
    }
}

impl<RI: Record> LogicalTable<RI> {
    pub(crate) fn new(core: ViewCore) -> Self {
        Self {
            core,
            _item: PhantomData,
        }
    }

    pub fn table_name(&self) -> &str {
        self.core.table_name()
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        self.core.binding.table()
    }

    pub fn binding(&self) -> &Arc<ViewBinding> {
        &self.core.binding
    }

    /// A view of the rows addressed by key type `K`, decoded as `I`.
    ///
    /// If `I` is already versioned, through the table descriptor when it is
    /// the root item type or through another view, this view enforces the
    /// same version attribute.
    pub fn inline_view<K: Record, I: Record>(&self) -> InlineView<K, I> {
        self.bind_inline(None)
    }

    /// Like [`inline_view`](Self::inline_view), with optimistic concurrency
    /// on `attribute`. Use this for item types not versioned elsewhere.
    pub fn versioned_inline_view<K: Record, I: Record>(
        &self,
        attribute: impl Into<String>,
    ) -> InlineView<K, I> {
        self.bind_inline(Some(attribute.into()))
    }

    fn bind_inline<K: Record, I: Record>(&self, version: Option<String>) -> InlineView<K, I> {
        let table = self.core.binding.shared_table();
        let registry = &self.core.ctx.registry;
        let version = version.or_else(|| registry.item_version(TypeId::of::<I>()));
        let binding = registry.register_view::<K, I>(table, None, version);
        InlineView {
            core: ViewCore::new(binding, Arc::clone(&self.core.ctx)),
            _types: PhantomData,
        }
    }

    pub fn secondary_index<K: Record, I: Record>(
        &self,
        index_name: &str,
    ) -> std::result::Result<SecondaryIndex<K, I>, BindingError> {
        let table = self.core.binding.shared_table();
        let index = table
            .find_index(index_name)
            .ok_or_else(|| BindingError::IndexNotFound {
                table: table.name.clone(),
                index: index_name.to_string(),
            })?;
        let binding = self
            .core
            .ctx
            .registry
            .register_view::<K, I>(table, Some(index), None);
        Ok(SecondaryIndex {
            core: ViewCore::new(binding, Arc::clone(&self.core.ctx)),
            _types: PhantomData,
        })
    }
}

impl<RI: Record> Loader<RI, RI> for LogicalTable<RI> {
    fn load(&self, key: &RI, consistency: ConsistentReads) -> Result<Option<RI>> {
        self.core.load(key, consistency)
    }
}

impl<RI: Record> Writer<RI, RI> for LogicalTable<RI> {
    fn save_with(&self, item: &RI, options: WriteOptions) -> Result<()> {
        self.core.save(item, options)
    }

    fn delete_key_with(&self, key: &RI, options: WriteOptions) -> Result<()> {
        self.core.delete_key(key, options)
    }

    fn delete_with(&self, item: &RI, options: WriteOptions) -> Result<()> {
        self.core.delete_item(item, options)
    }
}

impl<RI: Record> Scannable<RI, RI> for LogicalTable<RI> {
    fn scan(&self) -> Result<Page<RI, RI>> {
        self.core.scan_all(None)
    }

    fn scan_page(&self, page_size: usize, offset: Option<Offset<RI>>) -> Result<Page<RI, RI>> {
        self.core.scan_page(None, page_size, offset)
    }

    fn parallel_scan(&self, threads: usize) -> Result<Vec<Page<RI, RI>>> {
        self.core.parallel_scan(threads)
    }

    fn count(&self) -> Result<u64> {
        self.core.count()
    }
}

/// An alternate key/item typing of rows in the table's primary key space.
///
/// `K` must serialize to the table's primary key attributes; `I` must
/// deserialize from the rows `K` addresses.
pub struct InlineView<K, I> {
    core: ViewCore,
    _types: PhantomData<fn() -> (K, I)>,
}

impl<K, I> Clone for InlineView<K, I> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _types: PhantomData,
        }
    }
}

impl<K, I> InlineView<K, I> {
    pub fn table_name(&self) -> &str {
        self.core.table_name()
    }

    pub fn binding(&self) -> &Arc<ViewBinding> {
        &self.core.binding
    }
}

impl<K: Record, I: Record> Loader<K, I> for InlineView<K, I> {
    fn load(&self, key: &K, consistency: ConsistentReads) -> Result<Option<I>> {
        self.core.load(key, consistency)
    }
}

impl<K: Record, I: Record> Writer<K, I> for InlineView<K, I> {
    fn save_with(&self, item: &I, options: WriteOptions) -> Result<()> {
        self.core.save(item, options)
    }

    fn delete_key_with(&self, key: &K, options: WriteOptions) -> Result<()> {
        self.core.delete_key(key, options)
    }

    fn delete_with(&self, item: &I, options: WriteOptions) -> Result<()> {
        self.core.delete_item(item, options)
    }
}

impl<K: Record, I: Record> Queryable<K, I> for InlineView<K, I> {
    fn query(
        &self,
        start_inclusive: &K,
        end_exclusive: &K,
        options: QueryOptions<K>,
    ) -> Result<Page<K, I>> {
        self.core.query(start_inclusive, end_exclusive, options)
    }
}

/// A read-only view ordered by a secondary index.
///
/// Offsets carry both the index keys and the table's primary key.
pub struct SecondaryIndex<K, I> {
    core: ViewCore,
    _types: PhantomData<fn() -> (K, I)>,
}

impl<K, I> Clone for SecondaryIndex<K, I> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _types: PhantomData,
        }
    }
}

impl<K, I> SecondaryIndex<K, I> {
    pub fn table_name(&self) -> &str {
        self.core.table_name()
    }

    pub fn index_name(&self) -> &str {
        self.core.binding.index_name().unwrap_or_default()
    }

    pub fn binding(&self) -> &Arc<ViewBinding> {
        &self.core.binding
    }
}

impl<K: Record, I: Record> Queryable<K, I> for SecondaryIndex<K, I> {
    fn query(
        &self,
        start_inclusive: &K,
        end_exclusive: &K,
        options: QueryOptions<K>,
    ) -> Result<Page<K, I>> {
        self.core.query(start_inclusive, end_exclusive, options)
    }
}

impl<K: Record, I: Record> Scannable<K, I> for SecondaryIndex<K, I> {
    fn scan(&self) -> Result<Page<K, I>> {
        self.core.scan_all(None)
    }

    fn scan_page(&self, page_size: usize, offset: Option<Offset<K>>) -> Result<Page<K, I>> {
        self.core.scan_page(None, page_size, offset)
    }

    fn parallel_scan(&self, threads: usize) -> Result<Vec<Page<K, I>>> {
        self.core.parallel_scan(threads)
    }

    fn count(&self) -> Result<u64> {
        self.core.count()
    }
}
