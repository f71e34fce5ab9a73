//! In-memory [`StoreClient`] with fault injection.
//!
//! Items are kept per table in a `BTreeMap` keyed by the order-preserving
//! composite key encoding and stored as MessagePack. Secondary index order is
//! computed on demand at query/scan time. Store limits (batch sizes, item
//! size, 1MB response cap) are enforced the same way a remote store would.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::api::expression::Condition;
use crate::api::key_utils;
use crate::encoding::{KeyValue, composite};
use crate::error::{Error, SchemaError, StoreError};
use crate::types::{
    ConsistentReads, Document, IndexDescriptor, KeySchema, KeyType, MAX_BATCH_GET_KEYS,
    MAX_BATCH_WRITE_BYTES, MAX_BATCH_WRITE_ITEMS, MAX_ITEM_SIZE, MAX_QUERY_RESPONSE_BYTES,
    MAX_TRANSACTION_BYTES, MAX_TRANSACTION_ITEMS, TableDescriptor,
};

use super::{
    BatchGetOutput, BatchGetRequest, BatchWriteOutput, BatchWriteRequest, ClientResult,
    CountOutput, QueryOutput, QueryRequest, ScanRequest, Segment, SortRange, StoreClient,
    TableKey, TransactWriteOp, WriteRequest,
};

struct MemTable {
    descriptor: TableDescriptor,
    rows: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// Per-operation call counters, for asserting how many requests were made.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub get_item: AtomicUsize,
    pub put_item: AtomicUsize,
    pub delete_item: AtomicUsize,
    pub batch_get: AtomicUsize,
    pub batch_write: AtomicUsize,
    pub transact_get: AtomicUsize,
    pub transact_write: AtomicUsize,
    pub query: AtomicUsize,
    pub scan: AtomicUsize,
    pub count: AtomicUsize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        [
            &self.get_item,
            &self.put_item,
            &self.delete_item,
            &self.batch_get,
            &self.batch_write,
            &self.transact_get,
            &self.transact_write,
            &self.query,
            &self.scan,
            &self.count,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

#[derive(Default)]
struct Faults {
    /// Errors returned, in order, by the next calls of any kind.
    pending_errors: VecDeque<StoreError>,
    /// `(table, encoded key)` pairs that batch writes never process.
    rejected_writes: HashSet<(String, Vec<u8>)>,
    /// `(table, encoded key)` pairs that batch gets never process.
    deferred_keys: HashSet<(String, Vec<u8>)>,
}

/// A local, thread-safe store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, MemTable>>,
    faults: Mutex<Faults>,
    calls: CallCounts,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given tables already created.
    pub fn with_tables(
        descriptors: impl IntoIterator<Item = TableDescriptor>,
    ) -> Result<Self, Error> {
        let store = Self::new();
        for descriptor in descriptors {
            store.create_table(descriptor)?;
        }
        Ok(store)
    }

    pub fn create_table(&self, descriptor: TableDescriptor) -> Result<(), Error> {
        let mut tables = self.tables.write();
        if tables.contains_key(&descriptor.name) {
            return Err(SchemaError::TableAlreadyExists(descriptor.name).into());
        }
        debug!(table = %descriptor.name, "memory store table created");
        tables.insert(
            descriptor.name.clone(),
            MemTable {
                descriptor,
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<(), Error> {
        self.tables
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SchemaError::TableNotFound(name.to_string()).into())
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of items stored in `table`.
    pub fn item_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }

    /// Every stored item of `table`, in primary key order.
    pub fn dump(&self, table: &str) -> Vec<Document> {
        self.tables.read().get(table).map_or_else(Vec::new, |t| {
            t.rows.values().filter_map(|bytes| decode_item(bytes).ok()).collect()
        })
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    /// Make the next call (of any kind) fail with `error`.
    pub fn inject_error(&self, error: StoreError) {
        self.faults.lock().pending_errors.push_back(error);
    }

    /// Make the next `n` calls fail with a throttling error.
    pub fn inject_throttling(&self, n: usize) {
        let mut faults = self.faults.lock();
        for _ in 0..n {
            faults
                .pending_errors
                .push_back(StoreError::Throttled("provisioned throughput exceeded".into()));
        }
    }

    /// Batch writes addressing `key` in `table` are always left unprocessed.
    pub fn reject_batch_writes_to(&self, table: &str, key: &Document) -> Result<(), Error> {
        let encoded = self.encode_primary(table, key)?;
        self.faults
            .lock()
            .rejected_writes
            .insert((table.to_string(), encoded));
        Ok(())
    }

    /// Batch gets addressing `key` in `table` are always left unprocessed.
    pub fn defer_batch_gets_of(&self, table: &str, key: &Document) -> Result<(), Error> {
        let encoded = self.encode_primary(table, key)?;
        self.faults
            .lock()
            .deferred_keys
            .insert((table.to_string(), encoded));
        Ok(())
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    fn encode_primary(&self, table: &str, key: &Document) -> Result<Vec<u8>, Error> {
        let tables = self.tables.read();
        let t = tables
            .get(table)
            .ok_or_else(|| SchemaError::TableNotFound(table.to_string()))?;
        key_utils::encode_key(key, t.descriptor.key_schema())
    }

    fn enter(&self, counter: &AtomicUsize) -> ClientResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        match self.faults.lock().pending_errors.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn table_ref<'a>(
    tables: &'a HashMap<String, MemTable>,
    name: &str,
) -> ClientResult<&'a MemTable> {
    tables
        .get(name)
        .ok_or_else(|| StoreError::ResourceNotFound(format!("table {name}")))
}

fn table_mut<'a>(
    tables: &'a mut HashMap<String, MemTable>,
    name: &str,
) -> ClientResult<&'a mut MemTable> {
    tables
        .get_mut(name)
        .ok_or_else(|| StoreError::ResourceNotFound(format!("table {name}")))
}

fn invalid(e: impl std::fmt::Display) -> StoreError {
    StoreError::Validation(e.to_string())
}

fn decode_item(bytes: &[u8]) -> ClientResult<Document> {
    rmp_serde::from_slice(bytes).map_err(|e| invalid(format!("corrupted item: {e}")))
}

fn encode_item(item: &Document) -> ClientResult<Vec<u8>> {
    let bytes = rmp_serde::to_vec(item).map_err(invalid)?;
    if bytes.len() > MAX_ITEM_SIZE {
        return Err(invalid(format!(
            "item size {} exceeds {MAX_ITEM_SIZE} bytes",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn check_condition(
    condition: Option<&Condition>,
    current: Option<&Document>,
) -> ClientResult<bool> {
    match condition {
        Some(c) => c.eval(current).map_err(invalid),
        None => Ok(true),
    }
}

impl MemTable {
    fn primary_key(&self, doc: &Document) -> ClientResult<Vec<u8>> {
        key_utils::encode_key(doc, self.descriptor.key_schema()).map_err(invalid)
    }

    fn get(&self, key: &Document) -> ClientResult<Option<Document>> {
        let encoded = self.primary_key(key)?;
        self.rows.get(&encoded).map(|b| decode_item(b)).transpose()
    }

    fn index(&self, name: &str) -> ClientResult<&IndexDescriptor> {
        self.descriptor
            .find_index(name)
            .ok_or_else(|| StoreError::ResourceNotFound(format!("index {name}")))
    }

    /// Position of `doc` in the ordering of the table or of `index`.
    ///
    /// Returns `None` for items that do not carry the index keys (sparse
    /// indexes skip them).
    fn position(&self, doc: &Document, index: Option<&IndexDescriptor>) -> Option<Vec<u8>> {
        let (tpk, tsk) = key_utils::extract_key_values(doc, self.descriptor.key_schema()).ok()?;
        let mut values = Vec::with_capacity(4);
        if let Some(idx) = index {
            let (ipk, isk) = key_utils::extract_key_values(doc, idx.key_schema()).ok()?;
            values.push(ipk);
            values.extend(isk);
        }
        values.push(tpk);
        values.extend(tsk);
        composite::encode_values(&values).ok()
    }

    /// Key attributes reported as `last_evaluated_key`.
    fn evaluated_key(&self, doc: &Document, index: Option<&IndexDescriptor>) -> Document {
        let mut key = Document::new();
        let schemas = std::iter::once(self.descriptor.key_schema())
            .chain(index.map(IndexDescriptor::key_schema));
        for schema in schemas {
            for def in std::iter::once(schema.partition_key).chain(schema.sort_key) {
                if let Some(v) = doc.get(&def.name) {
                    key.insert(def.name.clone(), v.clone());
                }
            }
        }
        key
    }

    /// All items in table or index order, optionally restricted to a scan
    /// segment.
    fn ordered(
        &self,
        index: Option<&IndexDescriptor>,
        segment: Option<Segment>,
    ) -> ClientResult<Vec<(Vec<u8>, Document)>> {
        let mut rows = Vec::with_capacity(self.rows.len());
        for (primary, bytes) in &self.rows {
            let doc = decode_item(bytes)?;
            let position = match index {
                None => primary.clone(),
                Some(_) => match self.position(&doc, index) {
                    Some(p) => p,
                    None => continue,
                },
            };
            if let Some(seg) = segment {
                let hash_source = match index {
                    None => primary.as_slice(),
                    Some(_) => position.as_slice(),
                };
                let partition = leading_value(hash_source);
                if xxh3_64(partition) % u64::from(seg.total_segments) != u64::from(seg.segment) {
                    continue;
                }
            }
            rows.push((position, doc));
        }
        if index.is_some() {
            rows.sort_by(|a, b| a.0.cmp(&b.0));
        }
        Ok(rows)
    }
}

/// The bytes of the first tagged value in an encoded composite.
fn leading_value(encoded: &[u8]) -> &[u8] {
    let len = match composite::decode_values(encoded) {
        Ok(values) => values.first().and_then(|kv| {
            let mut buf = Vec::new();
            composite::push_value(&mut buf, kv).ok().map(|()| buf.len())
        }),
        Err(_) => None,
    };
    &encoded[..len.unwrap_or(encoded.len()).min(encoded.len())]
}

fn in_range(
    value: &KeyValue,
    range: &SortRange,
    key_type: KeyType,
    name: &str,
) -> ClientResult<bool> {
    let bound_value = |v: &serde_json::Value| {
        key_utils::json_to_key_value(v, key_type, name).map_err(invalid)
    };
    let lower_ok = match &range.lower {
        Bound::Unbounded => true,
        Bound::Included(v) => value.store_cmp(&bound_value(v)?).is_ge(),
        Bound::Excluded(v) => value.store_cmp(&bound_value(v)?).is_gt(),
    };
    let upper_ok = match &range.upper {
        Bound::Unbounded => true,
        Bound::Included(v) => value.store_cmp(&bound_value(v)?).is_le(),
        Bound::Excluded(v) => value.store_cmp(&bound_value(v)?).is_lt(),
    };
    Ok(lower_ok && upper_ok)
}

/// Apply the exclusive start key, limit, and 1MB response cap.
fn paginate(
    table: &MemTable,
    index: Option<&IndexDescriptor>,
    rows: Vec<(Vec<u8>, Document)>,
    scan_forward: bool,
    limit: Option<usize>,
    exclusive_start_key: Option<&Document>,
) -> ClientResult<QueryOutput> {
    let start = match exclusive_start_key {
        Some(key) => Some(
            table
                .position(key, index)
                .ok_or_else(|| invalid("exclusive start key does not match the key schema"))?,
        ),
        None => None,
    };
    let ordered: Box<dyn Iterator<Item = (Vec<u8>, Document)>> = if scan_forward {
        Box::new(rows.into_iter())
    } else {
        Box::new(rows.into_iter().rev())
    };
    let mut remaining = ordered
        .filter(|(pos, _)| match &start {
            None => true,
            Some(s) if scan_forward => pos > s,
            Some(s) => pos < s,
        })
        .peekable();

    let limit = limit.unwrap_or(usize::MAX);
    let mut items = Vec::new();
    let mut bytes = 0usize;
    while items.len() < limit {
        let Some((_, doc)) = remaining.peek() else {
            break;
        };
        let size = key_utils::item_size(doc).map_err(invalid)?;
        if !items.is_empty() && bytes + size > MAX_QUERY_RESPONSE_BYTES {
            break;
        }
        bytes += size;
        if let Some((_, doc)) = remaining.next() {
            items.push(doc);
        }
    }
    let last_evaluated_key = match (remaining.peek(), items.last()) {
        (Some(_), Some(last)) => Some(table.evaluated_key(last, index)),
        _ => None,
    };
    Ok(QueryOutput {
        items,
        last_evaluated_key,
    })
}

impl StoreClient for MemoryStore {
    fn get_item(
        &self,
        table: &str,
        key: &Document,
        _consistency: ConsistentReads,
    ) -> ClientResult<Option<Document>> {
        self.enter(&self.calls.get_item)?;
        let tables = self.tables.read();
        table_ref(&tables, table)?.get(key)
    }

    fn put_item(
        &self,
        table: &str,
        item: Document,
        condition: Option<&Condition>,
    ) -> ClientResult<()> {
        self.enter(&self.calls.put_item)?;
        let mut tables = self.tables.write();
        let t = table_mut(&mut tables, table)?;
        let encoded = t.primary_key(&item)?;
        let current = t.rows.get(&encoded).map(|b| decode_item(b)).transpose()?;
        if !check_condition(condition, current.as_ref())? {
            return Err(StoreError::ConditionalCheckFailed);
        }
        t.rows.insert(encoded, encode_item(&item)?);
        Ok(())
    }

    fn delete_item(
        &self,
        table: &str,
        key: &Document,
        condition: Option<&Condition>,
    ) -> ClientResult<()> {
        self.enter(&self.calls.delete_item)?;
        let mut tables = self.tables.write();
        let t = table_mut(&mut tables, table)?;
        let encoded = t.primary_key(key)?;
        let current = t.rows.get(&encoded).map(|b| decode_item(b)).transpose()?;
        if !check_condition(condition, current.as_ref())? {
            return Err(StoreError::ConditionalCheckFailed);
        }
        t.rows.remove(&encoded);
        Ok(())
    }

    fn batch_get(&self, request: BatchGetRequest) -> ClientResult<BatchGetOutput> {
        self.enter(&self.calls.batch_get)?;
        if request.keys.len() > MAX_BATCH_GET_KEYS {
            return Err(invalid(format!(
                "batch get of {} keys exceeds {MAX_BATCH_GET_KEYS}",
                request.keys.len()
            )));
        }
        let tables = self.tables.read();
        let faults = self.faults.lock();
        let mut output = BatchGetOutput::default();
        for TableKey { table, key } in request.keys {
            let t = table_ref(&tables, &table)?;
            let encoded = t.primary_key(&key)?;
            if faults.deferred_keys.contains(&(table.clone(), encoded.clone())) {
                output.unprocessed_keys.push(TableKey { table, key });
                continue;
            }
            if let Some(bytes) = t.rows.get(&encoded) {
                output.items.push((table, decode_item(bytes)?));
            }
        }
        Ok(output)
    }

    fn batch_write(&self, request: BatchWriteRequest) -> ClientResult<BatchWriteOutput> {
        self.enter(&self.calls.batch_write)?;
        if request.operations.len() > MAX_BATCH_WRITE_ITEMS {
            return Err(invalid(format!(
                "batch write of {} operations exceeds {MAX_BATCH_WRITE_ITEMS}",
                request.operations.len()
            )));
        }
        let mut tables = self.tables.write();
        let faults = self.faults.lock();

        // Validate the whole request before applying any of it.
        let mut seen = HashSet::new();
        let mut total = 0usize;
        let mut prepared = Vec::with_capacity(request.operations.len());
        for op in request.operations {
            let t = table_ref(&tables, op.table())?;
            let encoded = t.primary_key(op.document())?;
            if !seen.insert((op.table().to_string(), encoded.clone())) {
                return Err(invalid("batch write contains duplicate keys"));
            }
            let bytes = match &op {
                WriteRequest::Put { item, .. } => Some(encode_item(item)?),
                WriteRequest::Delete { .. } => None,
            };
            total += bytes.as_ref().map_or(0, Vec::len);
            prepared.push((op, encoded, bytes));
        }
        if total > MAX_BATCH_WRITE_BYTES {
            return Err(invalid("batch write payload exceeds 16MB"));
        }

        let mut output = BatchWriteOutput::default();
        for (op, encoded, bytes) in prepared {
            if faults
                .rejected_writes
                .contains(&(op.table().to_string(), encoded.clone()))
            {
                output.unprocessed.push(op);
                continue;
            }
            let t = table_mut(&mut tables, op.table())?;
            match bytes {
                Some(b) => {
                    t.rows.insert(encoded, b);
                }
                None => {
                    t.rows.remove(&encoded);
                }
            }
        }
        Ok(output)
    }

    fn transact_get(&self, keys: &[TableKey]) -> ClientResult<Vec<Option<Document>>> {
        self.enter(&self.calls.transact_get)?;
        if keys.len() > MAX_TRANSACTION_ITEMS {
            return Err(invalid(format!(
                "transaction of {} items exceeds {MAX_TRANSACTION_ITEMS}",
                keys.len()
            )));
        }
        let tables = self.tables.read();
        keys.iter()
            .map(|k| table_ref(&tables, &k.table)?.get(&k.key))
            .collect()
    }

    fn transact_write(&self, operations: Vec<TransactWriteOp>) -> ClientResult<()> {
        self.enter(&self.calls.transact_write)?;
        if operations.len() > MAX_TRANSACTION_ITEMS {
            return Err(invalid(format!(
                "transaction of {} items exceeds {MAX_TRANSACTION_ITEMS}",
                operations.len()
            )));
        }
        let mut tables = self.tables.write();

        let mut seen = HashSet::new();
        let mut total = 0usize;
        let mut reasons = Vec::with_capacity(operations.len());
        let mut keys = Vec::with_capacity(operations.len());
        for op in &operations {
            let t = table_ref(&tables, op.table())?;
            let (key_doc, condition) = match op {
                TransactWriteOp::Put {
                    item, condition, ..
                } => {
                    total += encode_item(item)?.len();
                    (item, condition.as_ref())
                }
                TransactWriteOp::Delete { key, condition, .. } => (key, condition.as_ref()),
                TransactWriteOp::ConditionCheck { key, condition, .. } => (key, Some(condition)),
            };
            let encoded = t.primary_key(key_doc)?;
            if !seen.insert((op.table().to_string(), encoded.clone())) {
                return Err(invalid(
                    "transaction request cannot include multiple operations on one item",
                ));
            }
            let current = t.rows.get(&encoded).map(|b| decode_item(b)).transpose()?;
            let passed = check_condition(condition, current.as_ref())?;
            reasons.push((!passed).then(|| "ConditionalCheckFailed".to_string()));
            keys.push(encoded);
        }
        if total > MAX_TRANSACTION_BYTES {
            return Err(invalid("transaction payload exceeds 4MB"));
        }
        if reasons.iter().any(Option::is_some) {
            return Err(StoreError::TransactionCanceled { reasons });
        }

        for (op, encoded) in operations.into_iter().zip(keys) {
            match op {
                TransactWriteOp::Put { table, item, .. } => {
                    let bytes = encode_item(&item)?;
                    table_mut(&mut tables, &table)?.rows.insert(encoded, bytes);
                }
                TransactWriteOp::Delete { table, .. } => {
                    table_mut(&mut tables, &table)?.rows.remove(&encoded);
                }
                TransactWriteOp::ConditionCheck { .. } => {}
            }
        }
        Ok(())
    }

    fn query(&self, request: &QueryRequest) -> ClientResult<QueryOutput> {
        self.enter(&self.calls.query)?;
        let tables = self.tables.read();
        let t = table_ref(&tables, &request.table)?;
        let index = request.index.as_deref().map(|n| t.index(n)).transpose()?;
        let schema: KeySchema<'_> = match index {
            Some(idx) => idx.key_schema(),
            None => t.descriptor.key_schema(),
        };
        let partition = key_utils::json_to_key_value(
            &request.partition_value,
            schema.partition_key.key_type,
            &schema.partition_key.name,
        )
        .map_err(invalid)?;

        let mut rows = Vec::new();
        for (position, doc) in t.ordered(index, None)? {
            let Ok(pk) = key_utils::extract_key(&doc, schema.partition_key) else {
                continue;
            };
            if pk != partition {
                continue;
            }
            let matches = match schema.sort_key {
                Some(def) => {
                    let Ok(sk) = key_utils::extract_key(&doc, def) else {
                        continue;
                    };
                    in_range(&sk, &request.sort_range, def.key_type, &def.name)?
                }
                None if request.sort_range == SortRange::unbounded() => true,
                None => return Err(invalid("sort key condition on a key schema without sort key")),
            };
            if matches {
                rows.push((position, doc));
            }
        }
        paginate(
            t,
            index,
            rows,
            request.scan_forward,
            request.limit,
            request.exclusive_start_key.as_ref(),
        )
    }

    fn scan(&self, request: &ScanRequest) -> ClientResult<QueryOutput> {
        self.enter(&self.calls.scan)?;
        let tables = self.tables.read();
        let t = table_ref(&tables, &request.table)?;
        let index = request.index.as_deref().map(|n| t.index(n)).transpose()?;
        let rows = t.ordered(index, request.segment)?;
        paginate(
            t,
            index,
            rows,
            true,
            request.limit,
            request.exclusive_start_key.as_ref(),
        )
    }

    fn count(&self, request: &ScanRequest) -> ClientResult<CountOutput> {
        self.enter(&self.calls.count)?;
        let tables = self.tables.read();
        let t = table_ref(&tables, &request.table)?;
        let index = request.index.as_deref().map(|n| t.index(n)).transpose()?;
        let rows = t.ordered(index, request.segment)?;
        let page = paginate(
            t,
            index,
            rows,
            true,
            request.limit,
            request.exclusive_start_key.as_ref(),
        )?;
        Ok(CountOutput {
            count: page.items.len() as u64,
            last_evaluated_key: page.last_evaluated_key,
        })
    }
}
