// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory [`IndexStore`] for testing.
//!
//! Applies bulk operations with search-index semantics:
//! - `index` creates or replaces
//! - `create` fails with 409 on an existing id
//! - `update` merges top-level fields and fails with 404 on a missing id
//!
//! Every call is recorded. Transport failures, partial bulk failures and
//! lookup failures can be injected for the next N calls.

use index_sync::document::Document;
use index_sync::index::{BulkItem, BulkOperation, BulkResponse, IndexStore};
use index_sync::{BoxFuture, SyncError};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub struct MockIndex {
    docs: Mutex<BTreeMap<String, Document>>,
    bulks: Mutex<Vec<Vec<BulkOperation>>>,
    lookups: Mutex<Vec<(String, Value)>>,
    next_auto_id: AtomicUsize,
    flushes: AtomicUsize,
    fail_bulks: AtomicUsize,
    partial_bulks: AtomicUsize,
    fail_lookups: AtomicUsize,
    fail_flushes: AtomicUsize,
    lookup_delay: Mutex<Option<Duration>>,
    lookups_in_flight: AtomicUsize,
    max_lookups_in_flight: AtomicUsize,
}

impl MockIndex {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(BTreeMap::new()),
            bulks: Mutex::new(Vec::new()),
            lookups: Mutex::new(Vec::new()),
            next_auto_id: AtomicUsize::new(1),
            flushes: AtomicUsize::new(0),
            fail_bulks: AtomicUsize::new(0),
            partial_bulks: AtomicUsize::new(0),
            fail_lookups: AtomicUsize::new(0),
            fail_flushes: AtomicUsize::new(0),
            lookup_delay: Mutex::new(None),
            lookups_in_flight: AtomicUsize::new(0),
            max_lookups_in_flight: AtomicUsize::new(0),
        }
    }

    /// Seed an index document.
    pub fn put(&self, id: &str, doc: Document) {
        self.docs.lock().unwrap().insert(id.to_string(), doc);
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Fail the next `n` bulk requests at the transport level.
    pub fn fail_next_bulks(&self, n: usize) {
        self.fail_bulks.store(n, Ordering::SeqCst);
    }

    /// Reject the first item of the next `n` bulk requests (429); the
    /// remaining items are applied.
    pub fn partially_fail_next_bulks(&self, n: usize) {
        self.partial_bulks.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_lookups(&self, n: usize) {
        self.fail_lookups.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_flushes(&self, n: usize) {
        self.fail_flushes.store(n, Ordering::SeqCst);
    }

    /// Hold each lookup open for `delay`, so concurrent lookups overlap.
    pub fn set_lookup_delay(&self, delay: Duration) {
        *self.lookup_delay.lock().unwrap() = Some(delay);
    }

    // =========================================================================
    // Assertions
    // =========================================================================

    pub fn get(&self, id: &str) -> Option<Document> {
        self.docs.lock().unwrap().get(id).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Document> {
        self.docs.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    /// Every bulk request received, including failed ones.
    pub fn bulks(&self) -> Vec<Vec<BulkOperation>> {
        self.bulks.lock().unwrap().clone()
    }

    pub fn operations(&self) -> Vec<BulkOperation> {
        self.bulks().into_iter().flatten().collect()
    }

    pub fn lookups(&self) -> Vec<(String, Value)> {
        self.lookups.lock().unwrap().clone()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn max_lookups_in_flight(&self) -> usize {
        self.max_lookups_in_flight.load(Ordering::SeqCst)
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn apply(&self, op: &BulkOperation) -> BulkItem {
        let mut docs = self.docs.lock().unwrap();
        let (id, status, error) = match op {
            BulkOperation::Index { id, doc } => {
                let id = id.clone().unwrap_or_else(|| self.auto_id());
                let status = if docs.insert(id.clone(), doc.clone()).is_some() { 200 } else { 201 };
                (id, status, None)
            }
            BulkOperation::Create { id, doc } => {
                let id = id.clone().unwrap_or_else(|| self.auto_id());
                if docs.contains_key(&id) {
                    let error = json!({
                        "type": "version_conflict_engine_exception",
                        "reason": format!("[{}]: version conflict, document already exists", id)
                    });
                    (id, 409, Some(error))
                } else {
                    docs.insert(id.clone(), doc.clone());
                    (id, 201, None)
                }
            }
            BulkOperation::Update { id, doc } => match docs.get_mut(id) {
                Some(existing) => {
                    for (k, v) in doc {
                        existing.insert(k.clone(), v.clone());
                    }
                    (id.clone(), 200, None)
                }
                None => {
                    let error = json!({
                        "type": "document_missing_exception",
                        "reason": format!("[{}]: document missing", id)
                    });
                    (id.clone(), 404, Some(error))
                }
            },
        };
        BulkItem {
            action: op.action().to_string(),
            id: Some(id),
            status,
            error,
        }
    }

    fn auto_id(&self) -> String {
        format!("auto-{}", self.next_auto_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl IndexStore for MockIndex {
    fn bulk<'a>(&'a self, ops: &'a [BulkOperation]) -> BoxFuture<'a, BulkResponse> {
        Box::pin(async move {
            self.bulks.lock().unwrap().push(ops.to_vec());
            if Self::take_fault(&self.fail_bulks) {
                return Err(SyncError::index_msg("bulk", "connection refused"));
            }

            let reject_first = Self::take_fault(&self.partial_bulks);
            let items: Vec<BulkItem> = ops
                .iter()
                .enumerate()
                .map(|(i, op)| {
                    if reject_first && i == 0 {
                        BulkItem {
                            action: op.action().to_string(),
                            id: op.id().map(str::to_string),
                            status: 429,
                            error: Some(json!({
                                "type": "es_rejected_execution_exception",
                                "reason": "rejected execution of coordinating operation"
                            })),
                        }
                    } else {
                        self.apply(op)
                    }
                })
                .collect();
            let errors = items.iter().any(|i| i.is_failure());
            Ok(BulkResponse {
                took: 1,
                errors,
                items,
            })
        })
    }

    fn find_ids<'a>(
        &'a self,
        field: &'a str,
        value: &'a Value,
        max_hits: usize,
    ) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.lookups
                .lock()
                .unwrap()
                .push((field.to_string(), value.clone()));
            let in_flight = self.lookups_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_lookups_in_flight.fetch_max(in_flight, Ordering::SeqCst);

            let delay = *self.lookup_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.lookups_in_flight.fetch_sub(1, Ordering::SeqCst);

            if Self::take_fault(&self.fail_lookups) {
                return Err(SyncError::index_msg("search", "search_phase_execution_exception"));
            }
            let docs = self.docs.lock().unwrap();
            Ok(docs
                .iter()
                .filter(|(_, doc)| doc.get(field) == Some(value))
                .map(|(id, _)| id.clone())
                .take(max_hits)
                .collect())
        })
    }

    fn flush(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            if Self::take_fault(&self.fail_flushes) {
                return Err(SyncError::index_msg("flush", "timeout"));
            }
            Ok(())
        })
    }
}
