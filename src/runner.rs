// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync runner: the control loop.
//!
//! # State Transitions
//!
//! ```text
//! Starting ──→ Counting ──→ Fetching ──→ Writing ──→ Advancing
//!                              ↑  │                      │
//!                              │  │ (empty batch)        │
//!                              │  ↓                      │
//!                              │ Done                    │
//!                              └─────────────────────────┘
//!
//! any state ──(fatal error)──→ Failed
//! Fetching  ──(stop requested, checked before each fetch)──→ Stopped
//! ```
//!
//! - **Starting**: configuration validated, reader and writer built.
//! - **Counting**: progress total estimated once.
//! - **Fetching**: next batch read after the checkpoint.
//! - **Writing**: batch transformed and written (retried as a whole).
//! - **Advancing**: checkpoint moved to the batch's last id, progress logged.
//! - **Done**: the source returned an empty batch.
//!
//! Batches are strictly sequential: a batch is never fetched before the
//! previous one has been written and the checkpoint advanced.

use crate::checkpoint::{Checkpoint, Progress};
use crate::config::SyncConfig;
use crate::document::SourceDocument;
use crate::error::Result;
use crate::index::{IndexStore, IndexWriter, WriteRequest};
use crate::resilience::RetryPolicy;
use crate::source::{DocumentSource, SourceReader};
use crate::transform::{self, TransformHook};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info};

/// State of the sync runner. See module docs for the transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Starting,
    Counting,
    Fetching,
    Writing,
    Advancing,
    /// Source exhausted.
    Done,
    /// Stopped on request before the source was exhausted.
    Stopped,
    /// A fatal error ended the run.
    Failed,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerState::Starting => write!(f, "Starting"),
            RunnerState::Counting => write!(f, "Counting"),
            RunnerState::Fetching => write!(f, "Fetching"),
            RunnerState::Writing => write!(f, "Writing"),
            RunnerState::Advancing => write!(f, "Advancing"),
            RunnerState::Done => write!(f, "Done"),
            RunnerState::Stopped => write!(f, "Stopped"),
            RunnerState::Failed => write!(f, "Failed"),
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub batches: usize,
    pub documents: usize,
    pub operations: usize,
    pub lookup_misses: usize,
    pub missing_keys: usize,
    /// Last advanced checkpoint; pass it as `start_after` to resume.
    pub checkpoint: Checkpoint,
    /// False when the run was stopped before the source was exhausted.
    pub completed: bool,
}

/// Requests a stop at the top of the next iteration.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// Drives batches from a [`DocumentSource`] into an [`IndexStore`].
pub struct SyncRunner<S: DocumentSource, I: IndexStore> {
    reader: SourceReader<S>,
    writer: IndexWriter<I>,
    hook: Arc<dyn TransformHook>,
    checkpoint: Checkpoint,
    progress: Progress,
    state_tx: watch::Sender<RunnerState>,
    state_rx: watch::Receiver<RunnerState>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl<S: DocumentSource, I: IndexStore> SyncRunner<S, I> {
    /// Validate `config` and wire the reader and writer.
    ///
    /// The checkpoint starts at `source.start_after` when given.
    pub fn new(
        config: &SyncConfig,
        source: Arc<S>,
        store: Arc<I>,
        hook: Arc<dyn TransformHook>,
    ) -> Result<Self> {
        config.validate()?;
        let retry: Arc<dyn RetryPolicy> = Arc::new(config.retry_config()?);
        Self::with_retry_policy(config, source, store, hook, retry)
    }

    /// Like [`SyncRunner::new`] with an explicit retry policy, which the
    /// caller is trusted to have paired with a validated config. Only the
    /// resume value is checked here.
    pub fn with_retry_policy(
        config: &SyncConfig,
        source: Arc<S>,
        store: Arc<I>,
        hook: Arc<dyn TransformHook>,
        retry: Arc<dyn RetryPolicy>,
    ) -> Result<Self> {
        let checkpoint = Checkpoint::from_resume_value(config.source.start_after.as_deref())?;
        let (state_tx, state_rx) = watch::channel(RunnerState::Starting);
        let (stop_tx, stop_rx) = watch::channel(false);
        crate::metrics::set_runner_state("Starting");

        Ok(Self {
            reader: SourceReader::new(source, config.source.batch_size, Arc::clone(&retry)),
            writer: IndexWriter::new(store, config.write.clone(), retry),
            hook,
            checkpoint,
            progress: Progress::default(),
            state_tx,
            state_rx,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        })
    }

    pub fn state(&self) -> RunnerState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<RunnerState> {
        self.state_rx.clone()
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    fn set_state(&self, state: RunnerState) {
        let _ = self.state_tx.send(state);
        crate::metrics::set_runner_state(&state.to_string());
    }

    /// Run until the source is exhausted, a stop is requested, or a fatal
    /// error occurs.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        match self.run_inner(&mut summary).await {
            Ok(()) => {
                summary.checkpoint = self.checkpoint.clone();
                Ok(summary)
            }
            Err(e) => {
                self.set_state(RunnerState::Failed);
                error!(checkpoint = %self.checkpoint, error = %e, "Sync failed");
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self, summary: &mut RunSummary) -> Result<()> {
        self.set_state(RunnerState::Counting);
        let total = self.reader.estimate_total(&self.checkpoint).await?;
        self.progress = Progress::new(total);
        crate::metrics::set_progress(total, total);
        info!(
            total,
            start_after = %self.checkpoint,
            batch_size = self.reader.batch_size(),
            mode = self.writer.mode().name(),
            transform = self.hook.name(),
            "Starting sync"
        );

        loop {
            if *self.stop_rx.borrow() {
                self.set_state(RunnerState::Stopped);
                info!(checkpoint = %self.checkpoint, "Sync stopped before completion");
                return Ok(());
            }

            let started = Instant::now();
            self.set_state(RunnerState::Fetching);
            let batch = self.reader.fetch_batch(&self.checkpoint).await?;
            let Some(last_id) = batch.last().map(|doc| doc.id.clone()) else {
                break;
            };

            self.set_state(RunnerState::Writing);
            let requests = self.prepare(batch)?;
            let outcome = self.writer.write_batch(&requests).await?;

            self.set_state(RunnerState::Advancing);
            self.checkpoint.advance(last_id)?;
            self.progress.record(outcome.documents);
            crate::metrics::set_progress(self.progress.total, self.progress.remaining);
            crate::metrics::record_batch_complete(started.elapsed());

            summary.batches += 1;
            summary.documents += outcome.documents;
            summary.operations += outcome.operations;
            summary.lookup_misses += outcome.lookup_misses;
            summary.missing_keys += outcome.missing_keys;

            info!(
                next_checkpoint = %self.checkpoint,
                percent = %format!("{:.2}", self.progress.percent_complete()),
                remaining = self.progress.remaining,
                "Batch written"
            );
        }

        self.set_state(RunnerState::Done);
        summary.completed = true;
        info!(
            batches = summary.batches,
            documents = summary.documents,
            operations = summary.operations,
            checkpoint = %self.checkpoint,
            "Sync complete"
        );
        Ok(())
    }

    /// Read each document's key, then strip the id and transform.
    fn prepare(&self, batch: Vec<SourceDocument>) -> Result<Vec<WriteRequest>> {
        let key_field = self.writer.mode().key_field();
        batch
            .into_iter()
            .map(|doc| {
                let key = doc.field(key_field).cloned();
                let body = transform::apply(self.hook.as_ref(), doc.fields)?;
                Ok(WriteRequest::new(key, body))
            })
            .collect()
    }
}
