// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Index writer: turns a batch of transformed documents into one bulk request.
//!
//! # Design
//!
//! ```text
//! WriteRequest[] ──┬─ insert ─────────▶ index/create op per doc (id = key)
//!                  │
//!                  ├─ direct_update ──▶ update op per doc (id = key)
//!                  │
//!                  └─ lookup_update ──▶ JoinSet: find_ids(key_field = key)
//!                                         │  (all lookups joined)
//!                                         ▼
//!                                      update op per hit, misses skipped
//!                                         │
//!                                         ▼
//!                                   one bulk request
//! ```
//!
//! A batch is all-or-nothing. A failed lookup or bulk transport error
//! triggers a best-effort flush, and that failure or any item-level failure
//! sends the *whole* batch through key resolution and the bulk write again. Operations that
//! are not idempotent (`create`, updates of ids that do not exist) can keep
//! failing on every resend; bound the retry policy if that matters.

use super::{BulkOperation, IndexStore};
use crate::config::{InsertAction, WriteMode};
use crate::document::{key_to_index_id, Document, TIMESTAMP_FIELD};
use crate::error::{Result, SyncError};
use crate::resilience::{retry_until_ok, Bulkhead, RetryPolicy};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// A transformed document and the key it is written under.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    /// Value of the configured key field, read from the source document
    /// before the transform ran. `None` when the field is absent.
    pub key: Option<Value>,
    /// Transformed document, source id already stripped.
    pub body: Document,
}

impl WriteRequest {
    pub fn new(key: Option<Value>, body: Document) -> Self {
        Self { key, body }
    }
}

/// Result of a successfully written batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Documents in the batch.
    pub documents: usize,
    /// Bulk operations sent (zero when nothing matched).
    pub operations: usize,
    /// Lookups that matched no index document.
    pub lookup_misses: usize,
    /// Documents skipped because their key field was absent.
    pub missing_keys: usize,
}

/// Writes batches to an [`IndexStore`] in the configured mode.
pub struct IndexWriter<I: IndexStore> {
    store: Arc<I>,
    mode: WriteMode,
    retry: Arc<dyn RetryPolicy>,
    lookup_limit: Option<Bulkhead>,
}

/// Bulk operations resolved for one attempt.
#[derive(Debug, Default)]
struct Plan {
    ops: Vec<BulkOperation>,
    lookup_misses: usize,
    missing_keys: usize,
}

impl<I: IndexStore> IndexWriter<I> {
    pub fn new(store: Arc<I>, mode: WriteMode, retry: Arc<dyn RetryPolicy>) -> Self {
        let lookup_limit = match &mode {
            WriteMode::LookupUpdate {
                concurrency: Some(n),
                ..
            } => Some(Bulkhead::new(*n)),
            _ => None,
        };
        Self {
            store,
            mode,
            retry,
            lookup_limit,
        }
    }

    pub fn mode(&self) -> &WriteMode {
        &self.mode
    }

    /// Write a batch, retrying the whole batch until it succeeds or the
    /// retry policy gives up.
    pub async fn write_batch(&self, batch: &[WriteRequest]) -> Result<WriteOutcome> {
        if batch.is_empty() {
            return Ok(WriteOutcome::default());
        }
        let outcome =
            retry_until_ok(self.retry.as_ref(), "index_write", || self.attempt(batch)).await?;
        crate::metrics::record_documents_written(outcome.documents);
        Ok(outcome)
    }

    async fn attempt(&self, batch: &[WriteRequest]) -> Result<WriteOutcome> {
        let plan = match self.plan(batch).await {
            Ok(plan) => plan,
            Err(e) => {
                if e.is_retryable() {
                    self.flush_best_effort().await;
                }
                return Err(e);
            }
        };
        let outcome = WriteOutcome {
            documents: batch.len(),
            operations: plan.ops.len(),
            lookup_misses: plan.lookup_misses,
            missing_keys: plan.missing_keys,
        };

        if plan.ops.is_empty() {
            info!(documents = batch.len(), "No documents to update");
            return Ok(outcome);
        }

        let start = Instant::now();
        let resp = match self.store.bulk(&plan.ops).await {
            Ok(resp) => resp,
            Err(e) => {
                self.flush_best_effort().await;
                return Err(e);
            }
        };

        if !resp.is_success() {
            let failed = resp.failed_count();
            crate::metrics::record_bulk_item_failures(failed);
            return Err(SyncError::PartialBulk {
                failed,
                total: plan.ops.len(),
                first_error: resp.first_error(),
            });
        }

        crate::metrics::record_bulk_write(plan.ops.len(), start.elapsed());
        for action in ["index", "create", "update"] {
            let n = plan.ops.iter().filter(|op| op.action() == action).count();
            if n > 0 {
                crate::metrics::record_bulk_operations(action, n);
            }
        }
        info!(
            took_ms = resp.took,
            operations = plan.ops.len(),
            "Bulk write accepted"
        );
        Ok(outcome)
    }

    async fn plan(&self, batch: &[WriteRequest]) -> Result<Plan> {
        match &self.mode {
            WriteMode::Insert { action, .. } => Ok(plan_insert(*action, batch)),
            WriteMode::DirectUpdate { key_field } => Ok(plan_direct_update(key_field, batch)),
            WriteMode::LookupUpdate {
                key_field,
                max_hits,
                ..
            } => self.plan_lookup_update(key_field, *max_hits, batch).await,
        }
    }

    /// One lookup per keyed document, all in flight together (or up to the
    /// bulkhead limit). Every lookup is joined before any result is used.
    async fn plan_lookup_update(
        &self,
        key_field: &str,
        max_hits: usize,
        batch: &[WriteRequest],
    ) -> Result<Plan> {
        let mut plan = Plan::default();
        let mut join_set: JoinSet<(usize, Result<Vec<String>>)> = JoinSet::new();

        for (pos, req) in batch.iter().enumerate() {
            let Some(value) = usable_key(req) else {
                warn!(field = key_field, "Document has no update key, skipping");
                crate::metrics::record_missing_key();
                plan.missing_keys += 1;
                continue;
            };
            let store = Arc::clone(&self.store);
            let field = key_field.to_string();
            let value = value.clone();
            let limit = self.lookup_limit.clone();

            join_set.spawn(async move {
                let _permit = match &limit {
                    Some(bulkhead) => match bulkhead.acquire().await {
                        Ok(permit) => Some(permit),
                        Err(e) => return (pos, Err(e.into())),
                    },
                    None => None,
                };
                (pos, store.find_ids(&field, &value, max_hits).await)
            });
        }

        let mut results = Vec::with_capacity(join_set.len());
        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((pos, Ok(ids))) => results.push((pos, ids)),
                Ok((_, Err(e))) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(SyncError::Internal(format!("lookup task failed: {}", e)));
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        results.sort_by_key(|(pos, _)| *pos);
        for (pos, ids) in results {
            let req = &batch[pos];
            crate::metrics::record_lookup(ids.len());
            if ids.is_empty() {
                let key = req.key.clone().unwrap_or_default();
                debug!(
                    field = key_field,
                    value = %key,
                    "No index document matches update key"
                );
                plan.lookup_misses += 1;
                continue;
            }
            for id in ids {
                plan.ops.push(BulkOperation::Update {
                    id,
                    doc: req.body.clone(),
                });
            }
        }
        Ok(plan)
    }

    async fn flush_best_effort(&self) {
        match self.store.flush().await {
            Ok(()) => crate::metrics::record_flush(true),
            Err(e) => {
                crate::metrics::record_flush(false);
                error!(error = %e, "Index flush failed");
            }
        }
    }
}

fn usable_key(req: &WriteRequest) -> Option<&Value> {
    req.key.as_ref().filter(|v| !v.is_null())
}

fn plan_insert(action: InsertAction, batch: &[WriteRequest]) -> Plan {
    let mut plan = Plan::default();
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    for req in batch {
        let id = usable_key(req).and_then(key_to_index_id);
        if id.is_none() {
            debug!("Document has no usable id, the index store will assign one");
        }
        let op = match action {
            InsertAction::Index => BulkOperation::Index {
                id,
                doc: req.body.clone(),
            },
            InsertAction::Create => {
                let mut doc = req.body.clone();
                if !doc.contains_key(TIMESTAMP_FIELD) {
                    doc.insert(TIMESTAMP_FIELD.to_string(), Value::String(now.clone()));
                }
                BulkOperation::Create { id, doc }
            }
        };
        plan.ops.push(op);
    }
    plan
}

fn plan_direct_update(key_field: &str, batch: &[WriteRequest]) -> Plan {
    let mut plan = Plan::default();
    for req in batch {
        match usable_key(req).and_then(key_to_index_id) {
            Some(id) => plan.ops.push(BulkOperation::Update {
                id,
                doc: req.body.clone(),
            }),
            None => {
                warn!(field = key_field, "Document has no update key, skipping");
                crate::metrics::record_missing_key();
                plan.missing_keys += 1;
            }
        }
    }
    plan
}
