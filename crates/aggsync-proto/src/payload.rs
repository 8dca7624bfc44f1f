//! Flat JSON object payloads.
//!
//! A payload is a single JSON object whose values are scalars. Strings are
//! taken as-is; numbers and booleans are kept as their JSON text so that a
//! producer writing `{"temp": 20}` is treated the same as `{"temp": "20"}`.
//! `null`, arrays, nested objects and repeated keys are rejected.

use aggsync_core::{Reading, Snapshot};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Object entries in document order, duplicates included.
struct FlatPairs(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for FlatPairs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = FlatPairs;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a flat JSON object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    pairs.push((key, value));
                }
                Ok(FlatPairs(pairs))
            }
        }

        deserializer.deserialize_map(PairsVisitor)
    }
}

fn scalar_text(key: &str, value: Value) -> Result<String, PayloadError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => {
            Err(PayloadError::NonScalar(key.to_string()))
        }
    }
}

fn decode_pairs(bytes: &[u8]) -> Result<Vec<(String, String)>, PayloadError> {
    let FlatPairs(pairs) =
        serde_json::from_slice(bytes).map_err(|e| PayloadError::Decode(e.to_string()))?;

    let mut seen = HashSet::with_capacity(pairs.len());
    pairs
        .into_iter()
        .map(|(key, value)| {
            if !seen.insert(key.clone()) {
                return Err(PayloadError::DuplicateKey(key));
            }
            scalar_text(&key, value).map(|text| (key, text))
        })
        .collect()
}

/// Decode a PUT body into a reading, preserving producer order.
///
/// # Errors
///
/// Returns error if the body is not a JSON object, a value is not a scalar,
/// or a key appears twice.
pub fn decode_reading(bytes: &[u8]) -> Result<Reading, PayloadError> {
    Ok(decode_pairs(bytes)?.into_iter().collect())
}

/// Decode a GET body into a snapshot.
///
/// # Errors
///
/// Returns error if the body is not a JSON object or a value is not a scalar.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, PayloadError> {
    Ok(decode_pairs(bytes)?.into_iter().collect())
}

/// Encode a snapshot as a flat JSON object.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<String, PayloadError> {
    serde_json::to_string(snapshot).map_err(|e| PayloadError::Encode(e.to_string()))
}

/// Encode a reading as a flat JSON object. Repeated keys collapse to the
/// last value, matching merge semantics.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn encode_reading(reading: &Reading) -> Result<String, PayloadError> {
    let object: serde_json::Map<String, Value> = reading
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    serde_json::to_string(&object).map_err(|e| PayloadError::Encode(e.to_string()))
}

/// Errors for payload encoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// Body is not a JSON object
    #[error("decode error: {0}")]
    Decode(String),
    /// A value is null, an array or a nested object
    #[error("value for key '{0}' is not a string, number or boolean")]
    NonScalar(String),
    /// A key appears more than once in one object
    #[error("duplicate key '{0}'")]
    DuplicateKey(String),
    /// Serialization failed
    #[error("encode error: {0}")]
    Encode(String),
}
