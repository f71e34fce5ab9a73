//! Batch engine.
//!
//! Heterogeneous write and key sets are resolved to their tables, grouped by
//! table in input order, and split into store calls that respect the batch
//! limits (25 writes or 16MB per write call, 100 keys per read call). Work the
//! store leaves unprocessed, and calls failing with a retryable error, are
//! retried with the configured backoff until the attempt budget runs out.
//! Writes left over after that are returned as unprocessed; reads left over
//! fail the load.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::client::{BatchGetRequest, BatchWriteRequest, TableKey, WriteRequest};
use crate::error::{Error, Result};
use crate::types::{
    ConsistentReads, Document, MAX_BATCH_GET_KEYS, MAX_BATCH_WRITE_BYTES, MAX_BATCH_WRITE_ITEMS,
};

use super::binding::{Context, ViewBinding};
use super::key_set::{ErasedEntry, ItemSet, KeySet};
use super::key_utils;
use super::write_set::{
    BatchWriteKind, BatchWriteOp, BatchWriteResult, BatchWriteSet, UnprocessedWrite,
};

/// A key resolved to its view and primary key.
pub(crate) struct PreparedKey {
    pub(crate) binding: Arc<ViewBinding>,
    pub(crate) key: Document,
    pub(crate) encoded: Vec<u8>,
}

impl PreparedKey {
    pub(crate) fn table(&self) -> &str {
        self.binding.table_name()
    }

    pub(crate) fn table_key(&self) -> TableKey {
        TableKey {
            table: self.table().to_string(),
            key: self.key.clone(),
        }
    }

    /// Decode a stored item and append it to `items`.
    pub(crate) fn push_item(&self, doc: Document, items: &mut ItemSet) -> Result<()> {
        let value = self.binding.decode(doc)?;
        items.push(
            self.table().to_string(),
            self.binding.item_type(),
            self.binding.item_type_name(),
            value,
        );
        Ok(())
    }
}

pub(crate) fn prepare_key(ctx: &Context, entry: &ErasedEntry) -> Result<PreparedKey> {
    let binding = ctx.registry.resolve_key(entry.type_id, entry.type_name)?;
    let doc = entry.to_document()?;
    let key = key_utils::key_attributes(&doc, binding.primary_schema())?;
    let encoded = key_utils::encode_key(&key, binding.primary_schema())?;
    Ok(PreparedKey {
        binding,
        key,
        encoded,
    })
}

struct PreparedWrite {
    index: usize,
    table: String,
    encoded: Vec<u8>,
    size: usize,
    request: WriteRequest,
}

fn prepare_write(ctx: &Context, index: usize, op: &BatchWriteOp) -> Result<PreparedWrite> {
    let entry = &op.entry;
    let binding = match op.kind {
        BatchWriteKind::Save | BatchWriteKind::DeleteItem => {
            ctx.registry.resolve_item(entry.type_id, entry.type_name)?
        }
        BatchWriteKind::DeleteKey => ctx.registry.resolve_key(entry.type_id, entry.type_name)?,
    };
    let schema = binding.primary_schema();
    let doc = entry.to_document()?;
    let encoded = key_utils::encode_key(&doc, schema)?;
    let table = binding.table_name().to_string();
    let (request, size) = match op.kind {
        BatchWriteKind::Save => {
            let size = key_utils::validate_item_size(&doc)?;
            (
                WriteRequest::Put {
                    table: table.clone(),
                    item: doc,
                },
                size,
            )
        }
        BatchWriteKind::DeleteKey | BatchWriteKind::DeleteItem => {
            let key = key_utils::key_attributes(&doc, schema)?;
            let size = key_utils::item_size(&key)?;
            (
                WriteRequest::Delete {
                    table: table.clone(),
                    key,
                },
                size,
            )
        }
    };
    Ok(PreparedWrite {
        index,
        table,
        encoded,
        size,
        request,
    })
}

/// Group by table in order of first appearance.
fn group_by_table<T>(items: Vec<T>, table: impl Fn(&T) -> &str) -> Vec<Vec<T>> {
    let mut groups: Vec<Vec<T>> = Vec::new();
    for item in items {
        match groups
            .iter_mut()
            .find(|group| group.first().is_some_and(|first| table(first) == table(&item)))
        {
            Some(group) => group.push(item),
            None => groups.push(vec![item]),
        }
    }
    groups
}

/// Split writes into calls within the count and size limits. A key already
/// present in the current call starts a new one, so later writes win.
fn chunk_writes(writes: Vec<PreparedWrite>) -> Vec<Vec<PreparedWrite>> {
    let mut chunks = Vec::new();
    for group in group_by_table(writes, |w| w.table.as_str()) {
        let mut chunk: Vec<PreparedWrite> = Vec::new();
        let mut bytes = 0usize;
        let mut keys = HashSet::new();
        for write in group {
            let full = chunk.len() == MAX_BATCH_WRITE_ITEMS
                || bytes + write.size > MAX_BATCH_WRITE_BYTES
                || keys.contains(&write.encoded);
            if full && !chunk.is_empty() {
                chunks.push(std::mem::take(&mut chunk));
                bytes = 0;
                keys.clear();
            }
            bytes += write.size;
            keys.insert(write.encoded.clone());
            chunk.push(write);
        }
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
    }
    chunks
}

/// Send one chunk until every write is processed or the retry budget runs
/// out. Writes still pending at that point, whether the store left them
/// unprocessed or kept throttling, are reported rather than failed.
fn write_chunk(
    ctx: &Context,
    chunk: Vec<PreparedWrite>,
    result: &mut BatchWriteResult,
) -> Result<()> {
    let mut delays = ctx.config.retry_policy.delays();
    let table = chunk.first().map(|w| w.table.clone()).unwrap_or_default();
    let mut pending = chunk;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let request = BatchWriteRequest {
            operations: pending.iter().map(|w| w.request.clone()).collect(),
        };
        match ctx.client.batch_write(request) {
            Ok(output) => {
                let (left, done): (Vec<_>, Vec<_>) = pending
                    .into_iter()
                    .partition(|w| output.unprocessed.contains(&w.request));
                result.processed.extend(done.iter().map(|w| w.index));
                pending = left;
                if pending.is_empty() {
                    return Ok(());
                }
                debug!(
                    table = %table,
                    attempt,
                    unprocessed = pending.len(),
                    "batch write left items unprocessed"
                );
            }
            Err(err) if err.is_retryable() => {
                warn!(table = %table, attempt, error = %err, "batch write failed");
            }
            Err(err) => return Err(err.into()),
        }
        let Some(delay) = delays.next() else {
            warn!(
                table = %table,
                attempts = attempt,
                unprocessed = pending.len(),
                "batch write retry budget exhausted"
            );
            result
                .unprocessed
                .extend(pending.into_iter().map(|w| UnprocessedWrite {
                    index: w.index,
                    request: w.request,
                }));
            return Ok(());
        };
        std::thread::sleep(delay);
    }
}

pub(crate) fn batch_write(ctx: &Context, set: &BatchWriteSet) -> Result<BatchWriteResult> {
    let writes = set
        .ops()
        .iter()
        .enumerate()
        .map(|(index, op)| prepare_write(ctx, index, op))
        .collect::<Result<Vec<_>>>()?;
    let chunks = chunk_writes(writes);
    debug!(operations = set.len(), calls = chunks.len(), "batch write");

    let mut result = BatchWriteResult::default();
    for chunk in chunks {
        write_chunk(ctx, chunk, &mut result)?;
    }
    Ok(result)
}

/// Read one table's keys, recording found items by encoded key.
fn read_chunk(
    ctx: &Context,
    chunk: &[&PreparedKey],
    consistency: ConsistentReads,
    found: &mut HashMap<(String, Vec<u8>), Document>,
) -> Result<()> {
    let Some(first) = chunk.first() else {
        return Ok(());
    };
    let schema = first.binding.primary_schema();
    let mut delays = ctx.config.retry_policy.delays();
    let mut pending: Vec<TableKey> = chunk.iter().map(|k| k.table_key()).collect();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let request = BatchGetRequest {
            keys: pending.clone(),
            consistency,
        };
        match ctx.client.batch_get(request) {
            Ok(output) => {
                for (table, doc) in output.items {
                    let encoded = key_utils::encode_key(&doc, schema)?;
                    found.insert((table, encoded), doc);
                }
                pending = output.unprocessed_keys;
                if pending.is_empty() {
                    return Ok(());
                }
                debug!(
                    table = %first.table(),
                    attempt,
                    unprocessed = pending.len(),
                    "batch get left keys unprocessed"
                );
            }
            Err(err) if err.is_retryable() => {
                warn!(table = %first.table(), attempt, error = %err, "batch get failed");
            }
            Err(err) => return Err(err.into()),
        }
        let Some(delay) = delays.next() else {
            warn!(
                table = %first.table(),
                attempts = attempt,
                unprocessed = pending.len(),
                "batch get retry budget exhausted"
            );
            return Err(Error::BatchLoadIncomplete {
                unprocessed: pending.len(),
                attempts: attempt,
            });
        };
        std::thread::sleep(delay);
    }
}

pub(crate) fn batch_load(
    ctx: &Context,
    keys: &KeySet,
    consistency: ConsistentReads,
) -> Result<ItemSet> {
    let mut prepared = Vec::with_capacity(keys.len());
    let mut seen = HashSet::new();
    for entry in keys.entries() {
        let key = prepare_key(ctx, entry)?;
        // The same key loaded twice as the same item type yields one item.
        if seen.insert((key.table().to_string(), key.encoded.clone(), key.binding.item_type())) {
            prepared.push(key);
        }
    }

    // Distinct rows to request; two key types may address one row.
    let mut requested = HashSet::new();
    let unique: Vec<&PreparedKey> = prepared
        .iter()
        .filter(|k| requested.insert((k.table().to_string(), k.encoded.clone())))
        .collect();

    let mut found = HashMap::new();
    let mut calls = 0usize;
    for group in group_by_table(unique, |k| k.table()) {
        for chunk in group.chunks(MAX_BATCH_GET_KEYS) {
            read_chunk(ctx, chunk, consistency, &mut found)?;
            calls += 1;
        }
    }
    debug!(keys = keys.len(), calls, found = found.len(), "batch load");

    let mut items = ItemSet::default();
    for key in &prepared {
        if let Some(doc) = found.get(&(key.table().to_string(), key.encoded.clone())) {
            key.push_item(doc.clone(), &mut items)?;
        }
    }
    Ok(items)
}
