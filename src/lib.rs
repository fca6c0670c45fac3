// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Index Sync
//!
//! Resumable, one-directional bulk sync of documents from a paginated source
//! (MongoDB) into a search index (Elasticsearch / OpenSearch).
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                                index-sync                                 │
//! │                                                                           │
//! │  ┌──────────────┐    ┌───────────────┐    ┌────────────────────────────┐  │
//! │  │ SourceReader │───►│ TransformHook │───►│ IndexWriter                │  │
//! │  │ (_id > cp,   │    │ (strip _id,   │    │ insert | direct_update |   │  │
//! │  │  sorted)     │    │  doc → doc')  │    │ lookup_update, bulk + retry│  │
//! │  └──────────────┘    └───────────────┘    └────────────────────────────┘  │
//! │         ▲                                              │                  │
//! │         │             ┌────────────┐                   │                  │
//! │         └─────────────│ Checkpoint │◄──────────────────┘                  │
//! │                       │ (in memory)│   advanced after each written batch  │
//! │                       └────────────┘                                      │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-least-once: a failed batch is resent whole, and a crashed
//! run resumes from an operator-supplied `start_after` id.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use index_sync::{ElasticClient, MongoSource, SyncConfig, SyncRunner};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> index_sync::Result<()> {
//!     let config = SyncConfig::load("sync.toml")?;
//!     let source = Arc::new(MongoSource::connect(&config.source).await?);
//!     let index = Arc::new(ElasticClient::connect(&config.index).await?);
//!     let hook = index_sync::transform::load(config.transform.script.as_deref())?;
//!
//!     let mut runner = SyncRunner::new(&config, source, index, hook)?;
//!     let summary = runner.run().await?;
//!     println!("synced {} documents", summary.documents);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod metrics;
pub mod resilience;
pub mod runner;
pub mod source;
pub mod transform;

use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async futures (keeps the store traits object-safe).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

// Re-exports for convenience
pub use checkpoint::{Checkpoint, Progress};
pub use config::{InsertAction, SyncConfig, WriteMode};
pub use document::{Document, SourceDocument, SourceId};
pub use error::{Result, SyncError};
pub use index::{BulkOperation, BulkResponse, ElasticClient, IndexStore, IndexWriter, WriteRequest};
pub use resilience::{RetryConfig, RetryPolicy};
pub use runner::{RunSummary, RunnerState, StopHandle, SyncRunner};
pub use source::{DocumentSource, MongoSource, SourceReader};
pub use transform::TransformHook;
