// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Checkpoint and progress tracking for a single run.
//!
//! The checkpoint is the `_id` of the last document of the last batch that
//! was written successfully. It lives in memory only: a restarted run resumes
//! from an operator-supplied starting checkpoint (`source.start_after`).
//!
//! ## Checkpoint Semantics
//!
//! ```text
//! fetch (_id > cp) → transform → bulk write OK → cp = last _id of batch
//!                                (crash here = batch re-sent on resume)
//! ```
//!
//! The checkpoint only moves forward. [`Checkpoint::advance`] refuses a value
//! that is not strictly greater than the current one, which is what makes the
//! pagination loop terminate.

use crate::document::SourceId;
use crate::error::{Result, SyncError};

/// Resume marker for pagination. Empty at the start of a fresh run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    last: Option<SourceId>,
}

impl Checkpoint {
    /// An empty checkpoint: the next fetch starts at the beginning.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start after an externally supplied id.
    pub fn starting_after(id: SourceId) -> Self {
        Self { last: Some(id) }
    }

    /// Build from an optional operator-supplied resume value, in the form
    /// [`SourceId::parse`] accepts. This checkpoint's `Display` output is
    /// such a value.
    pub fn from_resume_value(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Ok(Self::starting_after(SourceId::parse(raw)?)),
            None => Ok(Self::empty()),
        }
    }

    /// The last processed id, if any.
    pub fn get(&self) -> Option<&SourceId> {
        self.last.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    /// Whether `id` lies strictly after this checkpoint.
    pub fn admits(&self, id: &SourceId) -> bool {
        match &self.last {
            Some(last) => id > last,
            None => true,
        }
    }

    /// Move the checkpoint to `id`.
    ///
    /// Fails with [`SyncError::InvalidState`] if `id` does not lie strictly
    /// after the current value.
    pub fn advance(&mut self, id: SourceId) -> Result<()> {
        if !self.admits(&id) {
            return Err(SyncError::InvalidState {
                expected: format!("checkpoint > {}", self),
                actual: id.to_string(),
            });
        }
        self.last = Some(id);
        Ok(())
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.last {
            Some(id) => write!(f, "{}", id),
            None => write!(f, "<start>"),
        }
    }
}

/// Observability counters: estimated once, decremented per written batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub total: u64,
    pub remaining: u64,
}

impl Progress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            remaining: total,
        }
    }

    /// Account for `count` documents written. Saturates at zero since the
    /// total is only an estimate.
    pub fn record(&mut self, count: usize) {
        self.remaining = self.remaining.saturating_sub(count as u64);
    }

    /// Completed share in percent. An empty estimate counts as complete.
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        let done = self.total - self.remaining.min(self.total);
        done as f64 * 100.0 / self.total as f64
    }
}
