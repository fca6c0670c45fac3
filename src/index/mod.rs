// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Index side: the store trait, bulk operation types, and the writer.
//!
//! [`IndexStore`] is what the writer needs from a search index: a bulk
//! endpoint, an exact-match id lookup, and a flush. [`elastic::ElasticClient`]
//! implements it over HTTP; tests use an in-memory store.

pub mod elastic;
pub mod writer;

use crate::document::Document;
use crate::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use elastic::ElasticClient;
pub use writer::{IndexWriter, WriteOutcome, WriteRequest};

/// Operations the writer needs from an index store.
pub trait IndexStore: Send + Sync + 'static {
    /// Submit one bulk request. Item-level failures are reported in the
    /// response, not as an error.
    fn bulk<'a>(&'a self, ops: &'a [BulkOperation]) -> BoxFuture<'a, BulkResponse>;

    /// Ids of up to `max_hits` documents whose `field` equals `value` exactly.
    fn find_ids<'a>(
        &'a self,
        field: &'a str,
        value: &'a Value,
        max_hits: usize,
    ) -> BoxFuture<'a, Vec<String>>;

    /// Make recent writes durable/visible. Used best-effort after failures.
    fn flush(&self) -> BoxFuture<'_, ()>;
}

/// One item of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    /// Create or replace. No id lets the store generate one.
    Index { id: Option<String>, doc: Document },
    /// Create only.
    Create { id: Option<String>, doc: Document },
    /// Partial update of an existing document.
    Update { id: String, doc: Document },
}

impl BulkOperation {
    /// Bulk action name.
    pub fn action(&self) -> &'static str {
        match self {
            BulkOperation::Index { .. } => "index",
            BulkOperation::Create { .. } => "create",
            BulkOperation::Update { .. } => "update",
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            BulkOperation::Index { id, .. } | BulkOperation::Create { id, .. } => id.as_deref(),
            BulkOperation::Update { id, .. } => Some(id),
        }
    }

    pub fn doc(&self) -> &Document {
        match self {
            BulkOperation::Index { doc, .. }
            | BulkOperation::Create { doc, .. }
            | BulkOperation::Update { doc, .. } => doc,
        }
    }
}

/// Per-item result of a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItem {
    pub action: String,
    #[serde(default)]
    pub id: Option<String>,
    pub status: u16,
    /// Store-specific error object, present on failure.
    #[serde(default)]
    pub error: Option<Value>,
}

impl BulkItem {
    pub fn is_failure(&self) -> bool {
        self.error.is_some() || !(200..300).contains(&self.status)
    }
}

/// Outcome of an accepted bulk request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    /// Server-side time in milliseconds.
    pub took: u64,
    /// Whether any item failed.
    pub errors: bool,
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_failure()).count()
    }

    /// Whether the request as a whole succeeded.
    pub fn is_success(&self) -> bool {
        !self.errors && self.failed_count() == 0
    }

    /// A one-line description of the first failed item.
    pub fn first_error(&self) -> String {
        self.items
            .iter()
            .find(|i| i.is_failure())
            .map(|i| {
                let reason = i
                    .error
                    .as_ref()
                    .map(describe_item_error)
                    .unwrap_or_else(|| format!("status {}", i.status));
                format!(
                    "{} {}: {}",
                    i.action,
                    i.id.as_deref().unwrap_or("<auto>"),
                    reason
                )
            })
            .unwrap_or_else(|| "errors flag set without failed items".to_string())
    }
}

fn describe_item_error(error: &Value) -> String {
    match (error.get("type"), error.get("reason")) {
        (Some(Value::String(kind)), Some(Value::String(reason))) => format!("{}: {}", kind, reason),
        (Some(Value::String(kind)), _) => kind.clone(),
        _ => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(action: &str, id: &str, status: u16, error: Option<Value>) -> BulkItem {
        BulkItem {
            action: action.into(),
            id: Some(id.into()),
            status,
            error,
        }
    }

    #[test]
    fn test_operation_accessors() {
        let op = BulkOperation::Update {
            id: "7".into(),
            doc: Document::new(),
        };
        assert_eq!(op.action(), "update");
        assert_eq!(op.id(), Some("7"));

        let op = BulkOperation::Index {
            id: None,
            doc: Document::new(),
        };
        assert_eq!(op.action(), "index");
        assert_eq!(op.id(), None);
    }

    #[test]
    fn test_success_response() {
        let resp = BulkResponse {
            took: 3,
            errors: false,
            items: vec![item("index", "1", 201, None), item("index", "2", 200, None)],
        };
        assert!(resp.is_success());
        assert_eq!(resp.failed_count(), 0);
    }

    #[test]
    fn test_partial_failure_response() {
        let resp = BulkResponse {
            took: 3,
            errors: true,
            items: vec![
                item("create", "1", 201, None),
                item(
                    "create",
                    "2",
                    409,
                    Some(json!({"type": "version_conflict_engine_exception", "reason": "document already exists"})),
                ),
            ],
        };
        assert!(!resp.is_success());
        assert_eq!(resp.failed_count(), 1);
        assert_eq!(
            resp.first_error(),
            "create 2: version_conflict_engine_exception: document already exists"
        );
    }

    #[test]
    fn test_errors_flag_without_items() {
        let resp = BulkResponse {
            took: 0,
            errors: true,
            items: vec![],
        };
        assert!(!resp.is_success());
        assert!(resp.first_error().contains("errors flag"));
    }
}
