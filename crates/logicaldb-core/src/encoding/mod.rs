//! Order-preserving key encoding.
//!
//! Key values are encoded so that comparing the encoded bytes with `memcmp`
//! yields the same order the store uses for sort keys: numbers numerically,
//! strings and binary lexicographically by byte.

pub mod composite;

use std::cmp::Ordering;

use crate::error::EncodingError;

/// A decoded key attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    String(String),
    Number(f64),
    Binary(Vec<u8>),
}

impl KeyValue {
    /// Size in bytes counted against the key size limits.
    pub fn byte_size(&self) -> usize {
        match self {
            KeyValue::String(s) => s.len(),
            KeyValue::Number(_) => 8,
            KeyValue::Binary(b) => b.len(),
        }
    }

    /// Compare two key values of the same type in store order.
    ///
    /// Values of different types order by type tag.
    pub fn store_cmp(&self, other: &KeyValue) -> Ordering {
        match (self, other) {
            (KeyValue::String(a), KeyValue::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (KeyValue::Number(a), KeyValue::Number(b)) => a.total_cmp(b),
            (KeyValue::Binary(a), KeyValue::Binary(b)) => a.cmp(b),
            _ => composite::value_tag(self).cmp(&composite::value_tag(other)),
        }
    }
}

/// Encode an f64 into 8 bytes that sort numerically under `memcmp`.
///
/// Negative values have every bit flipped; non-negative values only the
/// sign bit. `-0.0` is folded into `+0.0`.
pub(crate) fn encode_number(value: f64) -> Result<[u8; 8], EncodingError> {
    if value.is_nan() {
        return Err(EncodingError::NaN);
    }
    let value = if value == 0.0 { 0.0_f64 } else { value };
    let bits = value.to_bits();
    let flipped = if value.is_sign_negative() {
        !bits
    } else {
        bits | (1u64 << 63)
    };
    Ok(flipped.to_be_bytes())
}

pub(crate) fn decode_number(data: [u8; 8]) -> f64 {
    let bits = u64::from_be_bytes(data);
    if bits & (1u64 << 63) != 0 {
        f64::from_bits(bits & !(1u64 << 63))
    } else {
        f64::from_bits(!bits)
    }
}

/// Encode raw bytes with an escaped `0x00 0x00` terminator.
///
/// A literal `0x00` becomes `0x00 0xFF`, which keeps shorter values sorting
/// before their extensions.
pub(crate) fn encode_bytes(data: &[u8], out: &mut Vec<u8>) {
    for &b in data {
        out.push(b);
        if b == 0x00 {
            out.push(0xFF);
        }
    }
    out.extend_from_slice(&[0x00, 0x00]);
}

/// Decode bytes written by [`encode_bytes`], returning the value and the
/// number of input bytes consumed (terminator included).
pub(crate) fn decode_bytes(data: &[u8]) -> Result<(Vec<u8>, usize), EncodingError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < data.len() {
        if data[i] != 0x00 {
            out.push(data[i]);
            i += 1;
            continue;
        }
        match data.get(i + 1) {
            Some(0x00) => return Ok((out, i + 2)),
            Some(0xFF) => {
                out.push(0x00);
                i += 2;
            }
            _ => return Err(EncodingError::MalformedKey),
        }
    }
    Err(EncodingError::MalformedKey)
}
