// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Elasticsearch (and OpenSearch) implementation of [`IndexStore`] over HTTP.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | connect | `GET /` (version check) |
//! | bulk | `POST /_bulk` (NDJSON) |
//! | find_ids | `POST /{index}/_search` with a `term` query |
//! | flush | `POST /{index}/_flush` |
//!
//! Stores older than 5.x are refused. Mapping types (`_type`) are only sent
//! to 5.x and 6.x, and only when configured.

use super::{BulkItem, BulkOperation, BulkResponse, IndexStore};
use crate::config::IndexConfig;
use crate::error::{Result, SyncError};
use crate::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

/// Oldest supported major version.
pub const MIN_MAJOR_VERSION: u64 = 5;

/// First major version without mapping types.
const TYPELESS_MAJOR_VERSION: u64 = 7;

/// Longest error body quoted in an error message.
const MAX_ERROR_BODY: usize = 512;

/// An HTTP client bound to one index.
#[derive(Debug, Clone)]
pub struct ElasticClient {
    http: Client,
    base_url: String,
    index: String,
    doc_type: Option<String>,
    username: Option<String>,
    password: Option<String>,
    version: String,
}

impl ElasticClient {
    /// Connect, read the server version and refuse unsupported versions.
    pub async fn connect(config: &IndexConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout_duration()?)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        let mut client = Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            doc_type: None,
            username: config.username.clone(),
            password: config.password.clone(),
            version: String::new(),
        };

        let resp = client
            .request(Method::GET, "/")
            .send()
            .await
            .map_err(|e| SyncError::index("info", e))?;
        let body = json_body("info", resp).await?;

        let version = ServerVersion::from_info(&body)?;
        let major = version.check()?;
        if major < TYPELESS_MAJOR_VERSION && !version.is_opensearch() {
            client.doc_type = config.doc_type.clone();
        }
        client.version = version.number.clone();

        info!(
            url = %client.base_url,
            index = %client.index,
            distribution = %version.distribution,
            version = %version.number,
            doc_type = client.doc_type.as_deref().unwrap_or("-"),
            "Connected to index store"
        );
        Ok(client)
    }

    /// Server version reported at connect time.
    pub fn version(&self) -> &str {
        &self.version
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }
}

impl IndexStore for ElasticClient {
    fn bulk<'a>(&'a self, ops: &'a [BulkOperation]) -> BoxFuture<'a, BulkResponse> {
        Box::pin(async move {
            let body = render_bulk_body(&self.index, self.doc_type.as_deref(), ops)?;
            debug!(operations = ops.len(), bytes = body.len(), "Sending bulk request");
            let resp = self
                .request(Method::POST, "/_bulk")
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(body)
                .send()
                .await
                .map_err(|e| SyncError::index("bulk", e))?;
            let body = json_body("bulk", resp).await?;
            parse_bulk_response(&body)
        })
    }

    fn find_ids<'a>(
        &'a self,
        field: &'a str,
        value: &'a Value,
        max_hits: usize,
    ) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async move {
            let resp = self
                .request(Method::POST, &format!("/{}/_search", self.index))
                .json(&term_query(field, value, max_hits))
                .send()
                .await
                .map_err(|e| SyncError::index("search", e))?;
            let body = json_body("search", resp).await?;
            Ok(parse_search_ids(&body))
        })
    }

    fn flush(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let resp = self
                .request(Method::POST, &format!("/{}/_flush", self.index))
                .send()
                .await
                .map_err(|e| SyncError::index("flush", e))?;
            json_body("flush", resp).await.map(|_| ())
        })
    }
}

/// Read a JSON body, turning non-2xx statuses into retryable errors.
async fn json_body(operation: &str, resp: Response) -> Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let mut text = resp.text().await.unwrap_or_default();
        if text.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("...");
        }
        return Err(SyncError::index_msg(operation, format!("HTTP {}: {}", status, text)));
    }
    resp.json::<Value>()
        .await
        .map_err(|e| SyncError::index(operation, e))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Version negotiation
// ═══════════════════════════════════════════════════════════════════════════════

/// `version` block of the root endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    pub distribution: String,
    pub number: String,
}

impl ServerVersion {
    pub fn from_info(info: &Value) -> Result<Self> {
        let version = info.get("version");
        let number = version
            .and_then(|v| v.get("number"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SyncError::index_msg("info", format!("root endpoint has no version.number: {}", info))
            })?;
        let distribution = version
            .and_then(|v| v.get("distribution"))
            .and_then(Value::as_str)
            .unwrap_or("elasticsearch");
        Ok(Self {
            distribution: distribution.to_string(),
            number: number.to_string(),
        })
    }

    pub fn is_opensearch(&self) -> bool {
        self.distribution.eq_ignore_ascii_case("opensearch")
    }

    /// Major version, or a fatal error when it predates the minimum.
    pub fn check(&self) -> Result<u64> {
        let major = self
            .number
            .split('.')
            .next()
            .and_then(|m| m.trim().parse::<u64>().ok())
            .ok_or_else(|| SyncError::UnsupportedIndexVersion {
                found: self.number.clone(),
                minimum: MIN_MAJOR_VERSION,
            })?;
        if self.is_opensearch() {
            // OpenSearch restarted numbering at 1 after forking 7.10.
            return Ok(major.max(TYPELESS_MAJOR_VERSION));
        }
        if major < MIN_MAJOR_VERSION {
            return Err(SyncError::UnsupportedIndexVersion {
                found: self.number.clone(),
                minimum: MIN_MAJOR_VERSION,
            });
        }
        Ok(major)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Wire format
// ═══════════════════════════════════════════════════════════════════════════════

/// Render a bulk request body: one action line and one source line per op.
pub fn render_bulk_body(index: &str, doc_type: Option<&str>, ops: &[BulkOperation]) -> Result<String> {
    let mut body = String::new();
    for op in ops {
        let mut meta = Map::new();
        meta.insert("_index".into(), Value::String(index.to_string()));
        if let Some(doc_type) = doc_type {
            meta.insert("_type".into(), Value::String(doc_type.to_string()));
        }
        if let Some(id) = op.id() {
            meta.insert("_id".into(), Value::String(id.to_string()));
        }

        let mut action = Map::new();
        action.insert(op.action().to_string(), Value::Object(meta));
        push_line(&mut body, &Value::Object(action))?;

        match op {
            BulkOperation::Update { doc, .. } => push_line(&mut body, &json!({ "doc": doc }))?,
            other => push_line(&mut body, other.doc())?,
        }
    }
    Ok(body)
}

fn push_line<T: Serialize + ?Sized>(body: &mut String, value: &T) -> Result<()> {
    let line = serde_json::to_string(value)
        .map_err(|e| SyncError::Internal(format!("failed to encode bulk line: {}", e)))?;
    body.push_str(&line);
    body.push('\n');
    Ok(())
}

/// Parse a `_bulk` response body.
pub fn parse_bulk_response(body: &Value) -> Result<BulkResponse> {
    let took = body.get("took").and_then(Value::as_u64).unwrap_or(0);
    let errors = body.get("errors").and_then(Value::as_bool).unwrap_or(false);
    let raw_items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::index_msg("bulk", format!("response has no items: {}", body)))?;

    let mut items = Vec::with_capacity(raw_items.len());
    for raw in raw_items {
        let Some((action, result)) = raw.as_object().and_then(|o| o.iter().next()) else {
            return Err(SyncError::index_msg("bulk", format!("malformed bulk item: {}", raw)));
        };
        items.push(BulkItem {
            action: action.clone(),
            id: result.get("_id").and_then(Value::as_str).map(str::to_string),
            status: result
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(0),
            error: result.get("error").cloned(),
        });
    }
    Ok(BulkResponse { took, errors, items })
}

/// Exact-match lookup body.
pub fn term_query(field: &str, value: &Value, max_hits: usize) -> Value {
    let mut term = Map::new();
    term.insert(field.to_string(), json!({ "value": value }));
    json!({
        "_source": false,
        "size": max_hits,
        "query": { "term": term },
    })
}

/// `hits.hits[]._id` of a search response.
pub fn parse_search_ids(body: &Value) -> Vec<String> {
    body.pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|h| h.get("_id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
