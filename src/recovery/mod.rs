//! Recovery controller
//!
//! Every call that talks to the remote source goes through
//! [`RecoveryController::run`]. Failures are classified into a
//! [`RecoveryAction`] and dispatched:
//! - rate limits and blocks rotate the outbound identity and retry,
//!   bounded by a per-operation budget
//! - transient failures back off for a randomized delay and retry in place
//! - permanent failures abandon the operation immediately
//!
//! Independently of the per-operation budget, the controller counts
//! consecutive rotations that failed to produce a new address. When that
//! count reaches `max-failed-rotations` the error is
//! [`RecoveryError::RotationExhausted`], which the orchestrator treats as
//! fatal for the whole phase.

use crate::config::RecoveryConfig;
use crate::rotation::{IdentityRotator, RotatorError};
use crate::source::{RemoteSource, SourceError, SourceResult};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Terminal outcome of a wrapped operation that did not succeed
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The failure was permanent; the operation was not retried
    #[error("Abandoned: {0}")]
    Abandoned(SourceError),

    /// The operation's own retry budget ran out
    #[error("{operation}: gave up after {attempts} retries (last error: {last})")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: SourceError,
    },

    /// Too many consecutive rotations failed to change the outbound address
    #[error("Identity rotation failed {failures} times in a row")]
    RotationExhausted { failures: u32 },

    #[error("Cancelled")]
    Cancelled,
}

impl RecoveryError {
    /// True for errors that should end the current phase, not just the unit of work
    pub fn is_fatal_for_phase(&self) -> bool {
        matches!(self, Self::RotationExhausted { .. } | Self::Cancelled)
    }
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// What to do about a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Obtain a new outbound identity, then retry from scratch
    Rotate,
    /// Sleep a short randomized delay, then retry in place
    Backoff,
    /// Give up on this unit of work
    Abandon,
}

/// Maps a remote source failure to the action that handles it
pub fn classify(error: &SourceError) -> RecoveryAction {
    match error {
        SourceError::RateLimited { .. } | SourceError::Blocked(_) => RecoveryAction::Rotate,
        SourceError::Transient(_) => RecoveryAction::Backoff,
        SourceError::Permanent(_) => RecoveryAction::Abandon,
    }
}

/// Counters for the run summary
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Rotations that produced a new address
    pub rotations: u64,
    /// Rotations that errored or left the address unchanged
    pub failed_rotations: u64,
    /// In-place retries after transient failures
    pub backoffs: u64,
    /// Operations given up on
    pub abandoned: u64,
}

/// Drives rotate/backoff/abandon decisions for remote source calls
pub struct RecoveryController {
    source: Arc<dyn RemoteSource>,
    rotator: Box<dyn IdentityRotator>,
    config: RecoveryConfig,
    cancel: CancellationToken,
    consecutive_failures: u32,
    stats: RecoveryStats,
}

impl RecoveryController {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        rotator: Box<dyn IdentityRotator>,
        config: RecoveryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            rotator,
            config,
            cancel,
            consecutive_failures: 0,
            stats: RecoveryStats::default(),
        }
    }

    pub fn stats(&self) -> RecoveryStats {
        self.stats
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs `op` until it succeeds or recovery gives up
    ///
    /// `op` is called again from scratch after every rotation or backoff, so
    /// it must be safe to repeat. `budget` bounds the rotations spent on this
    /// operation alone.
    pub async fn run<T, F, Fut>(
        &mut self,
        operation: &str,
        budget: u32,
        mut op: F,
    ) -> RecoveryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let mut rotations = 0u32;
        let mut backoffs = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(RecoveryError::Cancelled);
            }

            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match classify(&error) {
                RecoveryAction::Abandon => {
                    tracing::warn!("{}: {}", operation, error);
                    self.stats.abandoned += 1;
                    return Err(RecoveryError::Abandoned(error));
                }
                RecoveryAction::Backoff => {
                    if backoffs >= self.config.transient_retries {
                        self.stats.abandoned += 1;
                        return Err(RecoveryError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: backoffs,
                            last: error,
                        });
                    }
                    backoffs += 1;
                    self.stats.backoffs += 1;
                    tracing::debug!(
                        "{}: {} (retry {}/{})",
                        operation,
                        error,
                        backoffs,
                        self.config.transient_retries
                    );
                    self.backoff().await?;
                }
                RecoveryAction::Rotate => {
                    if rotations >= budget {
                        self.stats.abandoned += 1;
                        return Err(RecoveryError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: rotations,
                            last: error,
                        });
                    }
                    rotations += 1;
                    tracing::warn!(
                        "{}: {} (rotation {}/{})",
                        operation,
                        error,
                        rotations,
                        budget
                    );
                    self.rotate().await?;
                }
            }
        }
    }

    /// Rotates the outbound identity outside of any failure
    pub async fn rotate_now(&mut self, reason: &str) -> RecoveryResult<()> {
        tracing::info!("Proactive rotation: {}", reason);
        self.rotate().await
    }

    /// Requests a new address and regenerates the client session
    ///
    /// A rotation that errors or returns the same address counts as failed;
    /// a changed address resets the consecutive failure count.
    async fn rotate(&mut self) -> RecoveryResult<()> {
        let previous = self.rotator.current_address().unwrap_or("unknown").to_string();

        match self.rotator.rotate(&self.cancel).await {
            Ok(outcome) if outcome.changed => {
                tracing::info!("Outbound address changed: {} -> {}", previous, outcome.address);
                self.consecutive_failures = 0;
                self.stats.rotations += 1;
                self.source.rotate_fingerprint();
                return Ok(());
            }
            Ok(_) => {
                // Same address; a fresh fingerprint may still get through
                self.source.rotate_fingerprint();
            }
            Err(RotatorError::Cancelled) => return Err(RecoveryError::Cancelled),
            Err(e) => tracing::warn!("Identity rotation failed: {}", e),
        }

        self.consecutive_failures += 1;
        self.stats.failed_rotations += 1;

        if self.consecutive_failures >= self.config.max_failed_rotations {
            let failures = self.consecutive_failures;
            self.consecutive_failures = 0;
            tracing::error!("Identity rotation failed {} times in a row", failures);
            return Err(RecoveryError::RotationExhausted { failures });
        }
        Ok(())
    }

    async fn backoff(&self) -> RecoveryResult<()> {
        let min = self.config.backoff_min_ms;
        let max = self.config.backoff_max_ms.max(min);
        let delay = Duration::from_millis(rand::rng().random_range(min..=max));

        tokio::select! {
            _ = self.cancel.cancelled() => Err(RecoveryError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
