//! Retry / reschedule policy.
//!
//! Classifies a failed attempt into a disposition the dispatch backends
//! share: rate-limited outcomes defer the job without consuming a retry,
//! fatal outcomes burn bounded retries with exponential backoff.

use std::time::Duration;

use super::error::ProcessingError;
use super::job::Job;

/// Longest backoff we will ever schedule.
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Re-queue after the delay without touching `retry_count`
    Reschedule(Duration),
    /// Count a retry and re-queue after the backoff delay
    Retry(Duration),
    /// Retries exhausted or error non-retryable; job fails terminally
    Fail,
    /// Nothing left to do (asset deleted mid-job)
    Discard,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy;

impl RetryPolicy {
    /// Decide the disposition for `job` after `error`.
    pub fn disposition(&self, job: &Job, error: &ProcessingError) -> Disposition {
        match error {
            ProcessingError::RateLimited { retry_after, .. } => {
                Disposition::Reschedule(*retry_after)
            }
            ProcessingError::AssetGone { .. } => Disposition::Discard,
            ProcessingError::Transient(_) => {
                if job.has_retries_left() {
                    Disposition::Retry(self.backoff(job))
                } else {
                    Disposition::Fail
                }
            }
            ProcessingError::Fatal(_) => Disposition::Fail,
        }
    }

    /// Exponential backoff from the class base: `base * 2^retry_count`.
    pub fn backoff(&self, job: &Job) -> Duration {
        let base = job.task_class().retry_base_delay();
        let exponent = job.retry_count.clamp(0, 20) as u32;
        base.saturating_mul(2u32.saturating_pow(exponent))
            .min(MAX_BACKOFF)
    }
}
