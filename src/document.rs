// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document model shared by the source reader, transform hook and index writer.
//!
//! A [`Document`] is an ordered JSON object. Every document fetched from the
//! source carries a [`SourceId`] that is used only for pagination and
//! checkpointing; it is never written into the index.

use crate::error::{Result, SyncError};
use serde_json::{Map, Value};
use std::fmt;

/// An ordered mapping from field name to value.
pub type Document = Map<String, Value>;

/// Field holding the source identifier. Stripped before indexing.
pub const SOURCE_ID_FIELD: &str = "_id";

/// Field synthesized on `create` writes when the document has none.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// Monotonically orderable source identifier.
///
/// Variant order matters: it matches the BSON comparison order the source
/// store uses when sorting mixed `_id` types (numbers, then strings, then
/// ObjectIds), so `Ord` agrees with the store's ascending sort.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceId {
    /// Sequence-style integer id.
    Int(i64),
    /// Arbitrary string id.
    Text(String),
    /// 12-byte ObjectId, stored as 24 lowercase hex characters.
    ObjectId(String),
}

impl SourceId {
    /// Parse an operator-supplied resume value.
    ///
    /// | Input | Id |
    /// |-------|----|
    /// | `42` | integer |
    /// | `"42"` (a JSON string) | text |
    /// | `{"$oid": "5f1d.."}` or 24 bare hex characters | ObjectId |
    /// | anything else | text, taken verbatim |
    ///
    /// [`Display`](fmt::Display) writes these same forms, so a logged
    /// checkpoint parses back to the id it came from.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.starts_with('"') || raw.starts_with('{') {
            let value: Value = serde_json::from_str(raw).map_err(|e| {
                SyncError::Config(format!("invalid resume value {}: {}", raw, e))
            })?;
            return Self::from_value(&value).ok_or_else(|| {
                SyncError::Config(format!(
                    "resume value {} is not an integer, string or ObjectId",
                    raw
                ))
            });
        }
        if is_object_id_hex(raw) {
            return Ok(Self::ObjectId(raw.to_ascii_lowercase()));
        }
        match raw.parse::<i64>() {
            Ok(n) => Ok(Self::Int(n)),
            Err(_) => Ok(Self::Text(raw.to_string())),
        }
    }

    /// Extract a source id from a JSON value, if it has an orderable shape.
    ///
    /// Accepts integers, strings and extended-JSON ObjectIds (`{"$oid": ".."}`).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Object(map) => match map.get("$oid") {
                Some(Value::String(hex)) if map.len() == 1 && is_object_id_hex(hex) => {
                    Some(Self::ObjectId(hex.to_ascii_lowercase()))
                }
                _ => None,
            },
            _ => None,
        }
    }
}

fn is_object_id_hex(s: &str) -> bool {
    s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Whether `s` written bare would parse back as the same text id.
fn is_bare_text(s: &str) -> bool {
    !s.is_empty()
        && s == s.trim()
        && !s.starts_with('"')
        && !s.starts_with('{')
        && !is_object_id_hex(s)
        && s.parse::<i64>().is_err()
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Int(n) => write!(f, "{}", n),
            SourceId::Text(s) if is_bare_text(s) => write!(f, "{}", s),
            SourceId::Text(s) => write!(f, "{}", Value::from(s.as_str())),
            SourceId::ObjectId(hex) => write!(f, "{}", hex),
        }
    }
}

/// A document as fetched from the source, before any transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    /// Pagination key.
    pub id: SourceId,
    /// All fetched fields, `_id` included.
    pub fields: Document,
}

impl SourceDocument {
    pub fn new(id: SourceId, fields: Document) -> Self {
        Self { id, fields }
    }

    /// Look up a field of the untransformed document.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Remove the source identifier field from a document.
pub fn strip_source_id(mut doc: Document) -> Document {
    doc.remove(SOURCE_ID_FIELD);
    doc
}

/// Convert a key value into an index document id.
///
/// Strings are used as-is, numbers and booleans by their textual form,
/// extended-JSON ObjectIds by their hex string. Anything else (null, arrays,
/// objects) has no id form.
pub fn key_to_index_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => match map.get("$oid") {
            Some(Value::String(hex)) => Some(hex.clone()),
            _ => None,
        },
        _ => None,
    }
}
