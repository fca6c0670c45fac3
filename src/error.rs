// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the sync engine.
//!
//! Errors are split into two families: fatal errors that are detected once at
//! startup (or that indicate a broken contract) and terminate the run, and
//! transient I/O errors that the retry loop absorbs.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Config` | No | Missing or invalid option, bad predicate, bad transform |
//! | `UnsupportedIndexVersion` | No | Index store predates the supported minimum |
//! | `Transform` | No | Transform hook failed or returned a non-document |
//! | `UnsupportedSourceId` | No | Source `_id` cannot be used as a checkpoint |
//! | `Source` | Yes | Source fetch or count failure |
//! | `Index` | Yes | Index transport failure or non-2xx response |
//! | `PartialBulk` | Yes | Bulk accepted but some items failed |
//! | `RetriesExhausted` | No | Retry policy gave up |
//! | `InvalidState` | No | Ordering contract violated |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Use [`SyncError::is_retryable()`] to decide whether an operation should be
//! attempted again. [`crate::resilience::retry_until_ok`] does this for every
//! suspending call in the pipeline.

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while syncing.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid or missing configuration.
    ///
    /// Detected during startup. Fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The index store reported a version older than we can talk to.
    #[error("Unsupported index store version {found} (minimum major version {minimum})")]
    UnsupportedIndexVersion { found: String, minimum: u64 },

    /// The transform hook failed or produced something that is not a document.
    #[error("Transform error: {0}")]
    Transform(String),

    /// A source document carries an `_id` we cannot order or resume from.
    #[error("Unsupported source id: {0}")]
    UnsupportedSourceId(String),

    /// Source store read failure.
    ///
    /// Retryable: the identical fetch is reissued.
    #[error("Source error ({operation}): {message}")]
    Source { operation: String, message: String },

    /// Index store transport failure or error status.
    ///
    /// Retryable: the whole batch is resubmitted.
    #[error("Index error ({operation}): {message}")]
    Index {
        operation: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Bulk request accepted but the response reports item-level failures.
    ///
    /// Retryable: there is no per-item isolation, the whole batch is resent.
    #[error("Bulk write reported {failed} of {total} failed items (first: {first_error})")]
    PartialBulk {
        failed: usize,
        total: usize,
        first_error: String,
    },

    /// The retry policy stopped retrying a transient failure.
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: usize,
        last_error: String,
    },

    /// A state machine or ordering contract was violated.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Create a source error.
    pub fn source_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an index error from a reqwest::Error.
    pub fn index(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Index {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create an index error without source
    pub fn index_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Index {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source { .. } => true,
            Self::Index { .. } => true,
            Self::PartialBulk { .. } => true,
            Self::Config(_) => false,
            Self::UnsupportedIndexVersion { .. } => false,
            Self::Transform(_) => false,
            Self::UnsupportedSourceId(_) => false,
            Self::RetriesExhausted { .. } => false,
            Self::InvalidState { .. } => false,
            Self::Internal(_) => false,
        }
    }
}
