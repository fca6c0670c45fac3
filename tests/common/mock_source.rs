// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory [`DocumentSource`] for testing.
//!
//! Serves pages of a sorted document set and records every fetch.
//! Failures can be injected for the next N fetches or counts.

use index_sync::document::{SourceDocument, SourceId};
use index_sync::source::DocumentSource;
use index_sync::{BoxFuture, SyncError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// A recorded fetch_after() call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub after: Option<SourceId>,
    pub limit: usize,
}

pub struct MockSource {
    docs: Mutex<Vec<SourceDocument>>,
    fetches: Mutex<Vec<FetchCall>>,
    count_calls: AtomicUsize,
    fail_fetches: AtomicUsize,
    fail_counts: AtomicUsize,
    /// Serve pages in descending order (a misbehaving store).
    unordered: AtomicBool,
}

impl MockSource {
    pub fn new(mut docs: Vec<SourceDocument>) -> Self {
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            docs: Mutex::new(docs),
            fetches: Mutex::new(Vec::new()),
            count_calls: AtomicUsize::new(0),
            fail_fetches: AtomicUsize::new(0),
            fail_counts: AtomicUsize::new(0),
            unordered: AtomicBool::new(false),
        }
    }

    /// Fail the next `n` fetches with a transient error.
    pub fn fail_next_fetches(&self, n: usize) {
        self.fail_fetches.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` counts with a transient error.
    pub fn fail_next_counts(&self, n: usize) {
        self.fail_counts.store(n, Ordering::SeqCst);
    }

    pub fn serve_unordered(&self) {
        self.unordered.store(true, Ordering::SeqCst);
    }

    /// Add a document, as if written to the collection mid-run.
    pub fn insert(&self, doc: SourceDocument) {
        let mut docs = self.docs.lock().unwrap();
        docs.push(doc);
        docs.sort_by(|a, b| a.id.cmp(&b.id));
    }

    pub fn fetches(&self) -> Vec<FetchCall> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl DocumentSource for MockSource {
    fn fetch_after<'a>(
        &'a self,
        after: Option<&'a SourceId>,
        limit: usize,
    ) -> BoxFuture<'a, Vec<SourceDocument>> {
        Box::pin(async move {
            self.fetches.lock().unwrap().push(FetchCall {
                after: after.cloned(),
                limit,
            });
            if Self::take_fault(&self.fail_fetches) {
                return Err(SyncError::source_msg("find", "connection reset by peer"));
            }
            let mut page: Vec<SourceDocument> = self
                .docs
                .lock()
                .unwrap()
                .iter()
                .filter(|d| after.map_or(true, |a| d.id > *a))
                .take(limit)
                .cloned()
                .collect();
            if self.unordered.load(Ordering::SeqCst) {
                page.reverse();
            }
            Ok(page)
        })
    }

    fn count_after<'a>(&'a self, after: Option<&'a SourceId>) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            self.count_calls.fetch_add(1, Ordering::SeqCst);
            if Self::take_fault(&self.fail_counts) {
                return Err(SyncError::source_msg("count", "server selection timeout"));
            }
            let docs = self.docs.lock().unwrap();
            Ok(docs
                .iter()
                .filter(|d| after.map_or(true, |a| d.id > *a))
                .count() as u64)
        })
    }
}
