// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience utilities: retry policy, retry loop, bulkheads.
//!
//! - [`RetryPolicy`]: decides, per failed attempt, whether to try again
//! - [`RetryConfig`]: the configurable policy (unbounded and immediate by default)
//! - [`retry_until_ok`]: the loop every suspending call in the pipeline runs in
//! - [`Bulkhead`]: semaphore capping concurrent lookup queries
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> index_sync::Result<()> {
//! use index_sync::resilience::{retry_until_ok, RetryConfig};
//!
//! let policy = RetryConfig::testing();
//! let n = retry_until_ok(&policy, "count", || async { Ok(42u64) }).await?;
//! assert_eq!(n, 42);
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SyncError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, warn};

// =============================================================================
// Retry policy
// =============================================================================

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay (may be zero).
    RetryAfter(Duration),
    /// Stop and surface the failure.
    GiveUp,
}

/// Injectable retry decision. `attempt` is the 1-indexed number of the
/// attempt that just failed.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    fn on_failure(&self, attempt: usize) -> RetryDecision;
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    /// `usize::MAX` retries forever.
    pub max_attempts: usize,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Ceiling for the backoff delay.
    pub max_delay: Duration,

    /// Backoff multiplier (1.0 = constant delay).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RetryConfig {
    /// Retry forever, immediately. An attended batch job is expected to have
    /// an operator intervene on sustained outages.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: usize::MAX,
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_secs(30),
            backoff_factor: 1.0,
        }
    }

    /// Three immediate attempts, for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
        }
    }

    /// Bounded, immediate retries.
    pub fn bounded(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..Self::unbounded()
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts == usize::MAX
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 || self.initial_delay.is_zero() {
            return self.initial_delay;
        }

        let exponent = (attempt - 1).min(i32::MAX as usize) as i32;
        let multiplier = self.backoff_factor.powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        std::cmp::min(Duration::from_secs_f64(delay_secs), self.max_delay)
    }
}

impl RetryPolicy for RetryConfig {
    fn on_failure(&self, attempt: usize) -> RetryDecision {
        if attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.delay_for_attempt(attempt))
        }
    }
}

/// Run `f` until it succeeds, the error is not retryable, or `policy` gives up.
///
/// Every failed attempt is logged at `error` and counted. Exhaustion is
/// reported as [`SyncError::RetriesExhausted`], which is fatal.
pub async fn retry_until_ok<T, F, Fut>(
    policy: &dyn RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let err = match f().await {
            Ok(value) => {
                if attempt > 1 {
                    warn!(operation, attempts = attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        crate::metrics::record_retry(operation);

        match policy.on_failure(attempt) {
            RetryDecision::RetryAfter(delay) => {
                error!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            RetryDecision::GiveUp => {
                error!(operation, attempts = attempt, error = %err, "Giving up");
                return Err(SyncError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }
        }
    }
}

// =============================================================================
// Bulkhead (Concurrency Limiter)
// =============================================================================

/// Error when bulkhead is closed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bulkhead closed: max {max_concurrent} concurrent operations")]
pub struct BulkheadFull {
    /// Maximum concurrent operations allowed.
    pub max_concurrent: usize,
}

impl From<BulkheadFull> for SyncError {
    fn from(e: BulkheadFull) -> Self {
        SyncError::Internal(e.to_string())
    }
}

/// Limits concurrent operations with a semaphore.
///
/// Cheap to clone; clones share the same permits.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    /// Create a new bulkhead with the given concurrency limit.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Acquire a permit, waiting if necessary.
    ///
    /// Returns a permit that releases the slot when dropped.
    pub async fn acquire(&self) -> std::result::Result<OwnedSemaphorePermit, BulkheadFull> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BulkheadFull {
                max_concurrent: self.max_concurrent,
            })
    }
}
