// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared test utilities for integration, property and chaos tests.
//!
//! This module provides:
//! - An in-memory source collection with fault injection
//! - An in-memory index store that records every call
//! - Document and config helpers

#![allow(dead_code)]

pub mod mock_index;
pub mod mock_source;

pub use mock_index::*;
pub use mock_source::*;

use index_sync::config::{SyncConfig, WriteMode};
use index_sync::document::{Document, SourceDocument, SourceId};
use serde_json::{json, Value};

/// Build a JSON object from a `json!` literal.
pub fn obj(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// A source document with an integer `_id` plus `fields`.
pub fn int_doc(id: i64, fields: Value) -> SourceDocument {
    let mut doc = obj(json!({ "_id": id }));
    doc.extend(obj(fields));
    SourceDocument::new(SourceId::Int(id), doc)
}

/// A source document with a string `_id` plus `fields`.
pub fn text_doc(id: &str, fields: Value) -> SourceDocument {
    let mut doc = obj(json!({ "_id": id }));
    doc.extend(obj(fields));
    SourceDocument::new(SourceId::Text(id.to_string()), doc)
}

/// `n` documents with ids `1..=n`, each `{k: "k<id>", n: <id>}`.
pub fn numbered_docs(n: i64) -> Vec<SourceDocument> {
    (1..=n)
        .map(|i| int_doc(i, json!({ "k": format!("k{}", i), "n": i })))
        .collect()
}

/// Test config with the given batch size and write mode.
pub fn config(batch_size: usize, write: WriteMode) -> SyncConfig {
    let mut config = SyncConfig::for_testing();
    config.source.batch_size = batch_size;
    config.write = write;
    config
}
