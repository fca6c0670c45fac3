// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Source side: the store trait and the retrying reader on top of it.
//!
//! [`DocumentSource`] is the narrow seam to the store: an ordered, filtered
//! page of documents after a given id, and a count. [`SourceReader`] adds the
//! retry loop, batch sizing and the ordering checks the runner relies on.
//!
//! # Example
//!
//! ```rust,no_run
//! use index_sync::source::DocumentSource;
//! use index_sync::document::{SourceDocument, SourceId};
//! use index_sync::BoxFuture;
//!
//! struct Empty;
//!
//! impl DocumentSource for Empty {
//!     fn fetch_after<'a>(
//!         &'a self,
//!         _after: Option<&'a SourceId>,
//!         _limit: usize,
//!     ) -> BoxFuture<'a, Vec<SourceDocument>> {
//!         Box::pin(async { Ok(Vec::new()) })
//!     }
//!
//!     fn count_after<'a>(&'a self, _after: Option<&'a SourceId>) -> BoxFuture<'a, u64> {
//!         Box::pin(async { Ok(0) })
//!     }
//! }
//! ```

pub mod mongo;

use crate::checkpoint::Checkpoint;
use crate::document::{SourceDocument, SourceId};
use crate::error::{Result, SyncError};
use crate::resilience::{retry_until_ok, RetryPolicy};
use crate::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub use mongo::MongoSource;

/// A paginated, ordered read over the source collection.
///
/// Implementations apply the configured predicate and projection themselves.
pub trait DocumentSource: Send + Sync + 'static {
    /// Up to `limit` documents with `_id > after`, ascending by `_id`.
    fn fetch_after<'a>(
        &'a self,
        after: Option<&'a SourceId>,
        limit: usize,
    ) -> BoxFuture<'a, Vec<SourceDocument>>;

    /// Number of documents matching the predicate with `_id > after`.
    /// May be approximate.
    fn count_after<'a>(&'a self, after: Option<&'a SourceId>) -> BoxFuture<'a, u64>;
}

/// Retrying reader used by the runner.
pub struct SourceReader<S: DocumentSource> {
    source: Arc<S>,
    batch_size: usize,
    retry: Arc<dyn RetryPolicy>,
}

impl<S: DocumentSource> SourceReader<S> {
    pub fn new(source: Arc<S>, batch_size: usize, retry: Arc<dyn RetryPolicy>) -> Self {
        Self {
            source,
            batch_size,
            retry,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fetch the next batch after `checkpoint`. Empty means exhausted.
    ///
    /// Transient failures are retried per the policy. A batch that is not
    /// strictly ascending, or that does not lie entirely after the
    /// checkpoint, is rejected with [`SyncError::InvalidState`].
    pub async fn fetch_batch(&self, checkpoint: &Checkpoint) -> Result<Vec<SourceDocument>> {
        let start = Instant::now();
        let after = checkpoint.get();
        let batch = retry_until_ok(self.retry.as_ref(), "source_fetch", || {
            self.source.fetch_after(after, self.batch_size)
        })
        .await?;

        check_batch_order(checkpoint, &batch)?;
        if batch.len() > self.batch_size {
            return Err(SyncError::InvalidState {
                expected: format!("at most {} documents", self.batch_size),
                actual: batch.len().to_string(),
            });
        }

        let elapsed = start.elapsed();
        crate::metrics::record_fetch(batch.len(), elapsed);
        debug!(
            after = %checkpoint,
            fetched = batch.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Fetched batch"
        );
        Ok(batch)
    }

    /// Estimate the documents left after `checkpoint`, for progress only.
    pub async fn estimate_total(&self, checkpoint: &Checkpoint) -> Result<u64> {
        let after = checkpoint.get();
        retry_until_ok(self.retry.as_ref(), "source_count", || {
            self.source.count_after(after)
        })
        .await
    }
}

/// Every id must be after the checkpoint and after its predecessor.
pub fn check_batch_order(checkpoint: &Checkpoint, batch: &[SourceDocument]) -> Result<()> {
    let mut floor = checkpoint.clone();
    for doc in batch {
        if !floor.admits(&doc.id) {
            return Err(SyncError::InvalidState {
                expected: format!("source id > {}", floor),
                actual: doc.id.to_string(),
            });
        }
        floor = Checkpoint::starting_after(doc.id.clone());
    }
    Ok(())
}
