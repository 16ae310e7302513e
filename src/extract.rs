//! Attribute extraction
//!
//! Normalises one provider record into a canonical `(token_id, attributes)` pair.
//! The provider has shipped several record layouts over its API versions and
//! mixes them within a single response, so every lookup walks a fixed list of
//! fallbacks and takes the first one that yields something.

use crate::models::{Attribute, AttributeValue, TokenRecord};
use num_bigint::BigUint;
use serde_json::{Map, Value};
use std::borrow::Cow;

/// A place attributes may live in a record. Returns `None` when absent or empty.
type AttributeSource = fn(&Value) -> Option<Vec<Value>>;

/// Attribute sources in priority order.
const ATTRIBUTE_SOURCES: [(&str, AttributeSource); 4] = [
    ("raw.metadata.attributes", from_raw_payload),
    ("metadata.attributes", from_metadata),
    ("attributes", from_top_level),
    ("rawMetadata.attributes", from_legacy_raw_metadata),
];

/// Keys an attribute's name may be stored under, in priority order.
const NAME_KEYS: [&str; 3] = ["trait_type", "key", "traitType"];

/// Extracts the token id and attributes, or `None` when the record has no usable id.
pub fn extract(record: &Value) -> Option<TokenRecord> {
    let token_id = extract_token_id(record)?;
    Some(TokenRecord {
        token_id,
        attributes: extract_attributes(record),
    })
}

/// Canonical attribute list of a record. Never fails; missing data yields an empty list.
pub fn extract_attributes(record: &Value) -> Vec<Attribute> {
    ATTRIBUTE_SOURCES
        .iter()
        .find_map(|(_, source)| source(record))
        .map(|entries| entries.iter().filter_map(parse_attribute).collect())
        .unwrap_or_default()
}

/// Name of the attribute source that would be used for this record.
pub fn attribute_source_name(record: &Value) -> Option<&'static str> {
    ATTRIBUTE_SOURCES
        .iter()
        .find(|(_, source)| source(record).is_some())
        .map(|(name, _)| *name)
}

/// Reads the token id from `id.tokenId`, `id` or `tokenId` and normalises it to decimal.
pub fn extract_token_id(record: &Value) -> Option<String> {
    let from_id = match record.get("id") {
        Some(Value::Object(id)) => id.get("tokenId"),
        other => other,
    };
    let raw = from_id
        .filter(|v| !v.is_null())
        .or_else(|| record.get("tokenId").filter(|v| !v.is_null()))?;
    normalize_token_id(raw)
}

/// Canonical decimal form of a token id.
///
/// `0x` strings are read as hex, digit strings lose leading zeros, numbers are
/// floored. Anything else (including negatives) is rejected.
pub fn normalize_token_id(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                return BigUint::parse_bytes(hex.as_bytes(), 16).map(|n| n.to_string());
            }
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                return BigUint::parse_bytes(s.as_bytes(), 10).map(|n| n.to_string());
            }
            s.parse::<f64>().ok().and_then(floor_to_decimal)
        }
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().and_then(floor_to_decimal)
            }
        }
        _ => None,
    }
}

/// Display name from `title`, then `name`; empty when neither is a non-empty string.
pub fn display_name(record: &Value) -> String {
    ["title", "name"]
        .iter()
        .filter_map(|key| record.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn floor_to_decimal(v: f64) -> Option<String> {
    if !v.is_finite() || v < 0.0 {
        return None;
    }
    Some(format!("{:.0}", v.floor()))
}

fn parse_attribute(entry: &Value) -> Option<Attribute> {
    let obj = entry.as_object()?;
    let name = NAME_KEYS
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())?;
    let value = match obj.get("value") {
        Some(Value::String(s)) => AttributeValue::Text(s.clone()),
        Some(Value::Number(n)) => AttributeValue::Number(n.clone()),
        Some(Value::Bool(b)) => AttributeValue::Text(b.to_string()),
        None | Some(Value::Null) => AttributeValue::Text(String::new()),
        Some(_) => return None,
    };
    Some(Attribute {
        name: name.to_string(),
        value,
    })
}

/// Treats a JSON-encoded string as its decoded object; malformed input becomes `{}`.
fn lenient_object(value: &Value) -> Cow<'_, Value> {
    match value {
        Value::String(s) => Cow::Owned(
            serde_json::from_str::<Value>(s)
                .ok()
                .filter(Value::is_object)
                .unwrap_or_else(|| Value::Object(Map::new())),
        ),
        other => Cow::Borrowed(other),
    }
}

fn non_empty_attributes(container: &Value) -> Option<Vec<Value>> {
    container
        .get("attributes")?
        .as_array()
        .filter(|entries| !entries.is_empty())
        .cloned()
}

fn from_raw_payload(record: &Value) -> Option<Vec<Value>> {
    let raw = lenient_object(record.get("raw")?);
    let metadata = lenient_object(raw.get("metadata")?);
    non_empty_attributes(&metadata)
}

fn from_metadata(record: &Value) -> Option<Vec<Value>> {
    non_empty_attributes(&lenient_object(record.get("metadata")?))
}

fn from_top_level(record: &Value) -> Option<Vec<Value>> {
    non_empty_attributes(record)
}

fn from_legacy_raw_metadata(record: &Value) -> Option<Vec<Value>> {
    non_empty_attributes(&lenient_object(record.get("rawMetadata")?))
}
