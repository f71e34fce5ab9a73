//! Composite key encoding: `[tag][partition]([tag][sort])*`.
//!
//! The same layout encodes primary keys and secondary-index positions. An
//! index position appends the item's primary key after the index key so two
//! items sharing index values still occupy distinct positions.

use crate::error::EncodingError;
use crate::types::KeyType;

use super::{KeyValue, decode_bytes, decode_number, encode_bytes, encode_number};

pub const TAG_STRING: u8 = 0x01;
pub const TAG_NUMBER: u8 = 0x02;
pub const TAG_BINARY: u8 = 0x03;

pub fn key_type_tag(kt: KeyType) -> u8 {
    match kt {
        KeyType::String => TAG_STRING,
        KeyType::Number => TAG_NUMBER,
        KeyType::Binary => TAG_BINARY,
    }
}

pub(crate) fn value_tag(kv: &KeyValue) -> u8 {
    match kv {
        KeyValue::String(_) => TAG_STRING,
        KeyValue::Number(_) => TAG_NUMBER,
        KeyValue::Binary(_) => TAG_BINARY,
    }
}

/// Append one tagged key value to `out`.
pub fn push_value(out: &mut Vec<u8>, kv: &KeyValue) -> Result<(), EncodingError> {
    out.push(value_tag(kv));
    match kv {
        KeyValue::String(s) => encode_bytes(s.as_bytes(), out),
        KeyValue::Number(n) => out.extend_from_slice(&encode_number(*n)?),
        KeyValue::Binary(b) => encode_bytes(b, out),
    }
    Ok(())
}

/// Encode a sequence of key values into one comparable byte string.
pub fn encode_values<'a>(
    values: impl IntoIterator<Item = &'a KeyValue>,
) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::new();
    for kv in values {
        push_value(&mut out, kv)?;
    }
    Ok(out)
}

/// Encode a primary key (partition + optional sort).
pub fn encode_composite(
    partition: &KeyValue,
    sort: Option<&KeyValue>,
) -> Result<Vec<u8>, EncodingError> {
    encode_values(std::iter::once(partition).chain(sort))
}

/// Decode every tagged value in `data`.
pub fn decode_values(data: &[u8]) -> Result<Vec<KeyValue>, EncodingError> {
    let mut values = Vec::new();
    let mut rest = data;
    while let Some((&tag, body)) = rest.split_first() {
        let (kv, consumed) = match tag {
            TAG_STRING => {
                let (bytes, consumed) = decode_bytes(body)?;
                let s = String::from_utf8(bytes).map_err(|_| EncodingError::MalformedKey)?;
                (KeyValue::String(s), consumed)
            }
            TAG_NUMBER => {
                let arr: [u8; 8] = body
                    .get(..8)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(EncodingError::MalformedKey)?;
                (KeyValue::Number(decode_number(arr)), 8)
            }
            TAG_BINARY => {
                let (bytes, consumed) = decode_bytes(body)?;
                (KeyValue::Binary(bytes), consumed)
            }
            other => return Err(EncodingError::InvalidTypeTag(other)),
        };
        values.push(kv);
        rest = &body[consumed..];
    }
    Ok(values)
}
