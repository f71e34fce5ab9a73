use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Number, Value};

use crate::encoding::{KeyValue, composite};
use crate::error::{EncodingError, Error, SchemaError};
use crate::types::{
    Document, KeyDefinition, KeySchema, KeyType, MAX_ITEM_SIZE, MAX_PARTITION_KEY_SIZE,
    MAX_SORT_KEY_SIZE,
};

/// Serialize a typed record into an attribute map.
pub fn to_document<T: Serialize + ?Sized>(value: &T) -> Result<Document, EncodingError> {
    let type_name = std::any::type_name::<T>();
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(EncodingError::NotAnObject { type_name }),
        Err(e) => Err(EncodingError::Serialize {
            type_name,
            reason: e.to_string(),
        }),
    }
}

/// Deserialize an attribute map into a typed record.
///
/// Attributes the record does not model are ignored.
pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, EncodingError> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| EncodingError::Deserialize {
        type_name: std::any::type_name::<T>(),
        reason: e.to_string(),
    })
}

/// Convert a JSON attribute to a [`KeyValue`] of the expected type.
pub fn json_to_key_value(
    val: &Value,
    key_type: KeyType,
    attr_name: &str,
) -> Result<KeyValue, Error> {
    let mismatch = || SchemaError::KeyTypeMismatch {
        name: attr_name.to_string(),
        expected: key_type,
        actual: infer_key_type(val),
    };
    match key_type {
        KeyType::String => Ok(KeyValue::String(val.as_str().ok_or_else(mismatch)?.to_string())),
        KeyType::Number => match val {
            Value::Number(n) => Ok(KeyValue::Number(exact_f64(n)?)),
            _ => Err(mismatch().into()),
        },
        KeyType::Binary => {
            let bytes = val
                .as_array()
                .ok_or_else(mismatch)?
                .iter()
                .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(mismatch)?;
            Ok(KeyValue::Binary(bytes))
        }
    }
}

/// Number keys are stored as `f64`; integers it cannot hold exactly would
/// round onto a neighbouring key, so they are rejected.
fn exact_f64(n: &Number) -> Result<f64, EncodingError> {
    let inexact = || EncodingError::InexactNumber(n.to_string());
    let exact = match (n.as_i64(), n.as_u64()) {
        (Some(i), _) => (i as f64) as i128 == i128::from(i),
        (None, Some(u)) => (u as f64) as u128 == u128::from(u),
        _ => true,
    };
    match n.as_f64() {
        Some(f) if exact => Ok(f),
        _ => Err(inexact()),
    }
}

fn infer_key_type(val: &Value) -> KeyType {
    if val.is_string() {
        KeyType::String
    } else if val.is_number() {
        KeyType::Number
    } else {
        KeyType::Binary
    }
}

/// Extract and type-check one key attribute from a document.
pub fn extract_key(doc: &Document, key_def: &KeyDefinition) -> Result<KeyValue, Error> {
    let val = doc
        .get(&key_def.name)
        .ok_or_else(|| SchemaError::MissingKeyAttribute(key_def.name.clone()))?;
    json_to_key_value(val, key_def.key_type, &key_def.name)
}

/// Extract the partition and (if declared) sort key values of a document.
pub fn extract_key_values(
    doc: &Document,
    schema: KeySchema<'_>,
) -> Result<(KeyValue, Option<KeyValue>), Error> {
    let pk = extract_key(doc, schema.partition_key)?;
    validate_key_size(&pk, MAX_PARTITION_KEY_SIZE)?;
    let sk = match schema.sort_key {
        Some(def) => {
            let sk = extract_key(doc, def)?;
            validate_key_size(&sk, MAX_SORT_KEY_SIZE)?;
            Some(sk)
        }
        None => None,
    };
    Ok((pk, sk))
}

/// Project a document down to the attributes named by `schema`.
pub fn key_attributes(doc: &Document, schema: KeySchema<'_>) -> Result<Document, Error> {
    // Validates presence and types before copying.
    extract_key_values(doc, schema)?;
    let mut key = Document::new();
    for def in std::iter::once(schema.partition_key).chain(schema.sort_key) {
        if let Some(v) = doc.get(&def.name) {
            key.insert(def.name.clone(), v.clone());
        }
    }
    Ok(key)
}

/// Comparable encoding of the key described by `schema`.
pub fn encode_key(doc: &Document, schema: KeySchema<'_>) -> Result<Vec<u8>, Error> {
    let (pk, sk) = extract_key_values(doc, schema)?;
    Ok(composite::encode_composite(&pk, sk.as_ref())?)
}

fn validate_key_size(kv: &KeyValue, max: usize) -> Result<(), Error> {
    let actual = kv.byte_size();
    if actual > max {
        return Err(EncodingError::KeyTooLarge { max, actual }.into());
    }
    Ok(())
}

/// Size of a document as stored (MessagePack).
pub fn item_size(doc: &Document) -> Result<usize, EncodingError> {
    rmp_serde::to_vec(doc)
        .map(|bytes| bytes.len())
        .map_err(|e| EncodingError::MessagePack(e.to_string()))
}

/// Reject documents larger than the per-item limit, returning the size.
pub fn validate_item_size(doc: &Document) -> Result<usize, EncodingError> {
    let actual = item_size(doc)?;
    if actual > MAX_ITEM_SIZE {
        return Err(EncodingError::ItemTooLarge {
            max: MAX_ITEM_SIZE,
            actual,
        });
    }
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct AlbumKey {
        album_token: String,
        sort_key: String,
    }

    fn album_schema() -> (KeyDefinition, KeyDefinition) {
        (
            KeyDefinition::new("album_token", KeyType::String),
            KeyDefinition::new("sort_key", KeyType::String),
        )
    }

    #[test]
    fn test_document_roundtrip_ignores_extra_attributes() {
        let mut doc = to_document(&AlbumKey {
            album_token: "ALBUM_1".into(),
            sort_key: "INFO".into(),
        })
        .unwrap();
        doc.insert("album_title".into(), json!("The Dark Side"));
        let key: AlbumKey = from_document(doc).unwrap();
        assert_eq!(key.album_token, "ALBUM_1");
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(
            to_document(&42),
            Err(EncodingError::NotAnObject { .. })
        ));
    }

    #[test]
    fn test_key_attributes_projection() {
        let (pk, sk) = album_schema();
        let schema = KeySchema {
            partition_key: &pk,
            sort_key: Some(&sk),
        };
        let doc =
            to_document(&json!({"album_token": "A", "sort_key": "INFO", "title": "x"})).unwrap();
        let key = key_attributes(&doc, schema).unwrap();
        assert_eq!(key.len(), 2);
        assert!(!key.contains_key("title"));
    }

    #[test]
    fn test_missing_and_mismatched_key() {
        let (pk, sk) = album_schema();
        let schema = KeySchema {
            partition_key: &pk,
            sort_key: Some(&sk),
        };
        let missing = to_document(&json!({"album_token": "A"})).unwrap();
        assert!(matches!(
            encode_key(&missing, schema),
            Err(Error::Schema(SchemaError::MissingKeyAttribute(_)))
        ));
        let wrong = to_document(&json!({"album_token": 7, "sort_key": "INFO"})).unwrap();
        assert!(matches!(
            encode_key(&wrong, schema),
            Err(Error::Schema(SchemaError::KeyTypeMismatch { .. }))
        ));
    }

    #[test]
    fn test_binary_key_values() {
        let v = json_to_key_value(&json!([1, 2, 255]), KeyType::Binary, "b").unwrap();
        assert_eq!(v, KeyValue::Binary(vec![1, 2, 255]));
        assert!(json_to_key_value(&json!([256]), KeyType::Binary, "b").is_err());
    }

    #[test]
    fn test_number_keys_must_be_exact() {
        let exact = (1u64 << 53) as i64;
        assert_eq!(
            json_to_key_value(&json!(exact), KeyType::Number, "n").unwrap(),
            KeyValue::Number(exact as f64)
        );
        assert!(json_to_key_value(&json!(-2.5), KeyType::Number, "n").is_ok());
        for inexact in [json!((1u64 << 53) + 1), json!(u64::MAX), json!(i64::MAX)] {
            assert!(matches!(
                json_to_key_value(&inexact, KeyType::Number, "n"),
                Err(Error::Encoding(EncodingError::InexactNumber(_)))
            ));
        }
    }

    #[test]
    fn test_item_too_large() {
        let big = to_document(&json!({"id": "x", "blob": "a".repeat(MAX_ITEM_SIZE)})).unwrap();
        assert!(matches!(
            validate_item_size(&big),
            Err(EncodingError::ItemTooLarge { .. })
        ));
        let small = to_document(&json!({"id": "x"})).unwrap();
        assert!(validate_item_size(&small).unwrap() > 0);
    }
}
