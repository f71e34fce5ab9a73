//! Transaction engine.
//!
//! A [`TransactionWriteSet`] is checked locally before anything is sent:
//! versioned item types are rejected first, then the operation count, then
//! repeated targets, then the total payload size. Only a set passing every
//! check reaches the store, as a single all-or-nothing call.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::client::{TableKey, TransactWriteOp};
use crate::error::{Result, StoreError, TransactionError};
use crate::types::{Document, MAX_TRANSACTION_BYTES, MAX_TRANSACTION_ITEMS};

use super::batch::prepare_key;
use super::binding::Context;
use super::expression::Condition;
use super::key_set::{ItemSet, KeySet};
use super::key_utils;
use super::write_set::{TransactionKind, TransactionOp, TransactionWriteSet};

struct PreparedOp<'a> {
    op: &'a TransactionOp,
    table: String,
    doc: Document,
    schema_key: Document,
    encoded: Vec<u8>,
}

fn prepare_op<'a>(ctx: &Context, op: &'a TransactionOp) -> Result<PreparedOp<'a>> {
    let entry = &op.entry;
    let binding = match op.kind {
        TransactionKind::Save | TransactionKind::DeleteItem => {
            ctx.registry.resolve_item(entry.type_id, entry.type_name)?
        }
        TransactionKind::DeleteKey | TransactionKind::ConditionCheck => {
            ctx.registry.resolve_key(entry.type_id, entry.type_name)?
        }
    };
    // A key resolving to an unversioned view may still load a versioned type.
    if let Some(attribute) = ctx.registry.item_version(binding.item_type()) {
        return Err(TransactionError::VersioningUnsupported {
            type_name: binding.item_type_name(),
            attribute,
        }
        .into());
    }
    let doc = entry.to_document()?;
    let schema_key = key_utils::key_attributes(&doc, binding.primary_schema())?;
    let encoded = key_utils::encode_key(&schema_key, binding.primary_schema())?;
    Ok(PreparedOp {
        op,
        table: binding.table_name().to_string(),
        doc,
        schema_key,
        encoded,
    })
}

/// Reject a second operation on an item already targeted.
fn check_duplicates<'a>(
    targets: impl IntoIterator<Item = (&'a str, Vec<u8>)>,
) -> std::result::Result<(), TransactionError> {
    let mut seen: HashMap<(&str, Vec<u8>), usize> = HashMap::new();
    for (index, (table, encoded)) in targets.into_iter().enumerate() {
        if let Some(&first) = seen.get(&(table, encoded.clone())) {
            return Err(TransactionError::DuplicateTarget {
                table: table.to_string(),
                first,
                index,
            });
        }
        seen.insert((table, encoded), index);
    }
    Ok(())
}

/// Map a store-side cancellation to the operation that caused it.
fn abort_error(err: StoreError) -> crate::error::Error {
    match err {
        StoreError::TransactionCanceled { reasons } => {
            let failed = reasons
                .iter()
                .enumerate()
                .find_map(|(i, reason)| reason.as_ref().map(|r| (i, r.clone())));
            let (index, reason) = match failed {
                Some((i, reason)) => (Some(i), reason),
                None => (None, "TransactionCanceled".to_string()),
            };
            warn!(index = ?index, reason = %reason, "transaction cancelled");
            TransactionError::Aborted { index, reason }.into()
        }
        other => other.into(),
    }
}

pub(crate) fn transaction_write(ctx: &Context, set: &TransactionWriteSet) -> Result<()> {
    if set.is_empty() {
        return Ok(());
    }

    let prepared = set
        .ops()
        .iter()
        .map(|op| prepare_op(ctx, op))
        .collect::<Result<Vec<_>>>()?;
    if prepared.len() > MAX_TRANSACTION_ITEMS {
        return Err(TransactionError::TooManyItems {
            count: prepared.len(),
            max: MAX_TRANSACTION_ITEMS,
        }
        .into());
    }

    check_duplicates(prepared.iter().map(|p| (p.table.as_str(), p.encoded.clone())))?;

    let mut total = 0usize;
    let mut operations = Vec::with_capacity(prepared.len());
    for p in prepared {
        let condition = p.op.condition.clone();
        let (size, operation) = match p.op.kind {
            TransactionKind::Save => {
                let size = key_utils::validate_item_size(&p.doc)?;
                (
                    size,
                    TransactWriteOp::Put {
                        table: p.table,
                        item: p.doc,
                        condition,
                    },
                )
            }
            TransactionKind::DeleteKey | TransactionKind::DeleteItem => (
                key_utils::item_size(&p.schema_key)?,
                TransactWriteOp::Delete {
                    table: p.table,
                    key: p.schema_key,
                    condition,
                },
            ),
            TransactionKind::ConditionCheck => (
                key_utils::item_size(&p.schema_key)?,
                TransactWriteOp::ConditionCheck {
                    table: p.table,
                    key: p.schema_key,
                    condition: condition.unwrap_or(Condition::And(Vec::new())),
                },
            ),
        };
        total += size;
        operations.push(operation);
    }
    if total > MAX_TRANSACTION_BYTES {
        return Err(TransactionError::TooLarge {
            max: MAX_TRANSACTION_BYTES,
            actual: total,
        }
        .into());
    }

    debug!(operations = operations.len(), bytes = total, "transaction write");
    ctx.client.transact_write(operations).map_err(abort_error)
}

pub(crate) fn transaction_load(ctx: &Context, keys: &KeySet) -> Result<ItemSet> {
    if keys.is_empty() {
        return Ok(ItemSet::default());
    }
    if keys.len() > MAX_TRANSACTION_ITEMS {
        return Err(TransactionError::TooManyItems {
            count: keys.len(),
            max: MAX_TRANSACTION_ITEMS,
        }
        .into());
    }

    let prepared = keys
        .entries()
        .iter()
        .map(|entry| prepare_key(ctx, entry))
        .collect::<Result<Vec<_>>>()?;
    check_duplicates(prepared.iter().map(|k| (k.table(), k.encoded.clone())))?;

    let request: Vec<TableKey> = prepared.iter().map(|k| k.table_key()).collect();
    let found = ctx.client.transact_get(&request).map_err(abort_error)?;
    debug!(keys = request.len(), "transaction load");

    let mut items = ItemSet::default();
    for (key, doc) in prepared.iter().zip(found) {
        if let Some(doc) = doc {
            key.push_item(doc, &mut items)?;
        }
    }
    Ok(items)
}
