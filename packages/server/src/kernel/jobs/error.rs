//! Typed errors for job processing.
//!
//! Uses `thiserror` for library errors (not `anyhow`); the worker loop never
//! lets a processor failure escape untyped — everything is translated into
//! one of these before it reaches the retry policy.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Outcome taxonomy for a failed processing attempt.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// An upstream domain refused or paced us out.
    ///
    /// Expected and recoverable: the job is rescheduled after `retry_after`
    /// without consuming a retry attempt.
    #[error("rate limited by {domain}, retry in {retry_after:?}")]
    RateLimited {
        domain: String,
        retry_after: Duration,
    },

    /// The underlying asset disappeared mid-job (deleted by its owner).
    ///
    /// Benign early-exit: not a failure, nothing to retry.
    #[error("asset {asset_id} no longer exists")]
    AssetGone { asset_id: Uuid },

    /// A transient defect (network hiccup, upstream 5xx). Retried with
    /// bounded exponential backoff.
    #[error("{0}")]
    Transient(#[source] anyhow::Error),

    /// A permanent defect. No retry regardless of remaining attempts.
    #[error("{0}")]
    Fatal(#[source] anyhow::Error),
}

impl ProcessingError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        ProcessingError::Transient(err.into())
    }

    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        ProcessingError::Fatal(err.into())
    }

    /// Message safe to surface to users and the event channel.
    ///
    /// Uses `Display` only — source chains and backtraces stay internal.
    pub fn public_message(&self) -> String {
        self.to_string()
    }
}
