// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! MongoDB implementation of [`DocumentSource`].
//!
//! # Query shape
//!
//! ```text
//! find(  query AND _id > checkpoint  )
//!   .sort({ _id: 1 })
//!   .limit(batch_size)
//!   .projection({ field: 1, ... })     # only when fields are configured
//! ```
//!
//! When the configured query itself constrains `_id`, the checkpoint bound
//! is combined with `$and` instead of overwriting the query's `_id` clause.
//!
//! Documents are converted to JSON as they leave the driver: ObjectIds
//! become hex strings, dates become RFC 3339 strings, everything else uses
//! relaxed extended JSON.

use super::DocumentSource;
use crate::config::SourceConfig;
use crate::document::{Document as JsonDocument, SourceDocument, SourceId, SOURCE_ID_FIELD};
use crate::error::{Result, SyncError};
use crate::BoxFuture;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::options::FindOptions;
use mongodb::{Client, Collection};
use serde_json::Value;
use tracing::{debug, info};

/// A MongoDB collection read in `_id` order.
pub struct MongoSource {
    collection: Collection<Document>,
    query: Document,
    projection: Option<Document>,
}

impl MongoSource {
    /// Connect and ping the database. Failures here are fatal for the run.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let query = query_to_bson(config.query.as_ref())?;
        let projection = projection(config.fields.as_deref());

        let client = Client::with_uri_str(&config.uri)
            .await
            .map_err(|e| SyncError::Config(format!("invalid source.uri: {}", e)))?;
        let db = client.database(&config.database);
        db.run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| SyncError::source_msg("ping", e.to_string()))?;

        info!(
            database = %config.database,
            collection = %config.collection,
            filtered = !query.is_empty(),
            projected = projection.is_some(),
            "Connected to source"
        );

        Ok(Self {
            collection: db.collection::<Document>(&config.collection),
            query,
            projection,
        })
    }
}

impl DocumentSource for MongoSource {
    fn fetch_after<'a>(
        &'a self,
        after: Option<&'a SourceId>,
        limit: usize,
    ) -> BoxFuture<'a, Vec<SourceDocument>> {
        Box::pin(async move {
            let filter = build_filter(&self.query, after)?;
            let mut options = FindOptions::default();
            options.sort = Some(doc! { "_id": 1 });
            options.limit = Some(i64::try_from(limit).unwrap_or(i64::MAX));
            options.projection = self.projection.clone();

            debug!(?filter, limit, "Querying source");
            let cursor = self
                .collection
                .find(filter, options)
                .await
                .map_err(|e| SyncError::source_msg("find", e.to_string()))?;
            let raw: Vec<Document> = cursor
                .try_collect()
                .await
                .map_err(|e| SyncError::source_msg("find", e.to_string()))?;

            raw.into_iter().map(to_source_document).collect()
        })
    }

    fn count_after<'a>(&'a self, after: Option<&'a SourceId>) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            if self.query.is_empty() && after.is_none() {
                return self
                    .collection
                    .estimated_document_count(None)
                    .await
                    .map_err(|e| SyncError::source_msg("estimated_count", e.to_string()));
            }
            let filter = build_filter(&self.query, after)?;
            self.collection
                .count_documents(filter, None)
                .await
                .map_err(|e| SyncError::source_msg("count", e.to_string()))
        })
    }
}

/// Convert the configured JSON predicate to BSON. Extended JSON such as
/// `{"$oid": ".."}` and `{"$date": ".."}` is honoured.
pub fn query_to_bson(query: Option<&Value>) -> Result<Document> {
    let Some(query) = query else {
        return Ok(Document::new());
    };
    match Bson::try_from(query.clone()) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(other) => Err(SyncError::Config(format!(
            "source.query must be an object, got {:?}",
            other.element_type()
        ))),
        Err(e) => Err(SyncError::Config(format!("invalid source.query: {}", e))),
    }
}

/// `{field: 1, ...}`, or `None` when all fields are wanted.
pub fn projection(fields: Option<&[String]>) -> Option<Document> {
    let fields = fields.filter(|f| !f.is_empty())?;
    Some(
        fields
            .iter()
            .map(|f| (f.clone(), Bson::Int32(1)))
            .collect(),
    )
}

/// The query with the checkpoint bound applied.
pub fn build_filter(query: &Document, after: Option<&SourceId>) -> Result<Document> {
    let Some(after) = after else {
        return Ok(query.clone());
    };
    let bound = id_to_bson(after)?;
    if query.contains_key(SOURCE_ID_FIELD) {
        return Ok(doc! { "$and": [query.clone(), { "_id": { "$gt": bound } }] });
    }
    let mut filter = query.clone();
    filter.insert(SOURCE_ID_FIELD, doc! { "$gt": bound });
    Ok(filter)
}

fn id_to_bson(id: &SourceId) -> Result<Bson> {
    match id {
        SourceId::Int(n) => Ok(Bson::Int64(*n)),
        SourceId::Text(s) => Ok(Bson::String(s.clone())),
        SourceId::ObjectId(hex) => ObjectId::parse_str(hex)
            .map(Bson::ObjectId)
            .map_err(|e| SyncError::UnsupportedSourceId(format!("{}: {}", hex, e))),
    }
}

fn source_id(value: Option<&Bson>) -> Result<SourceId> {
    match value {
        Some(Bson::ObjectId(oid)) => Ok(SourceId::ObjectId(oid.to_hex())),
        Some(Bson::Int32(n)) => Ok(SourceId::Int(i64::from(*n))),
        Some(Bson::Int64(n)) => Ok(SourceId::Int(*n)),
        Some(Bson::String(s)) => Ok(SourceId::Text(s.clone())),
        Some(other) => Err(SyncError::UnsupportedSourceId(format!(
            "{:?} value {}",
            other.element_type(),
            other
        ))),
        None => Err(SyncError::UnsupportedSourceId("document without _id".into())),
    }
}

fn to_source_document(raw: Document) -> Result<SourceDocument> {
    let id = source_id(raw.get(SOURCE_ID_FIELD))?;
    Ok(SourceDocument::new(id, document_to_json(raw)))
}

/// Convert a BSON document to an ordered JSON object.
pub fn document_to_json(doc: Document) -> JsonDocument {
    doc.into_iter().map(|(k, v)| (k, bson_to_json(v))).collect()
}

/// Convert one BSON value to JSON.
pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => match dt.try_to_rfc3339_string() {
            Ok(s) => Value::String(s),
            Err(_) => Bson::DateTime(dt).into_relaxed_extjson(),
        },
        Bson::Document(doc) => Value::Object(document_to_json(doc)),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        other => other.into_relaxed_extjson(),
    }
}
