//! Dispatch backend contract.
//!
//! Two structurally different dispatch mechanisms — the in-memory broker
//! queue and the leased job table — present this one contract to the worker
//! loop. The concrete variant is chosen once at startup from configuration,
//! never at call sites.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use super::error::ProcessingError;
use super::job::{AssetType, Job};
use super::store::{HeartbeatOutcome, QueueCounts};

/// Which dispatch backend the process runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Push-based in-memory broker with per-job locks
    Broker,
    /// Pull-based long-poll over a leased job table
    Poll,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "broker" => Ok(BackendKind::Broker),
            "poll" => Ok(BackendKind::Poll),
            other => anyhow::bail!("unknown dispatch backend: {other} (expected broker|poll)"),
        }
    }
}

/// Read-only per-queue status for operational tooling.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    pub asset_type: AssetType,
    #[serde(flatten)]
    pub counts: QueueCounts,
    pub paused: bool,
}

/// The single contract both dispatch mechanisms implement.
///
/// Guarantees shared by all implementations:
/// - at most one active claim per job at any instant
/// - a crashed worker's job becomes reclaimable within a bounded window
/// - `reschedule` ("retry later with delay X") is distinct from `nack`
///   (a failed attempt)
#[async_trait]
pub trait DispatchBackend: Send + Sync {
    /// Submit a job for execution.
    async fn enqueue(&self, job: Job) -> Result<Uuid>;

    /// Claim one job of `asset_type`, blocking up to the backend's bounded
    /// wait. `None` is the normal "no job available" outcome, not an error.
    async fn claim(&self, asset_type: AssetType, worker_id: &str) -> Result<Option<Job>>;

    /// Renew the claim on a running job. The outcome tells the caller
    /// whether it still owns the job.
    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<HeartbeatOutcome>;

    /// Report success; the job reaches terminal `completed`.
    async fn ack(&self, job_id: Uuid) -> Result<()>;

    /// Report a failed attempt; the retry policy decides re-queue vs
    /// terminal failure.
    async fn nack(&self, job_id: Uuid, error: &ProcessingError) -> Result<()>;

    /// Defer the job by `delay` without consuming a retry attempt.
    /// Returns false when the job is unknown to the backend.
    async fn reschedule(&self, job_id: Uuid, delay: Duration) -> Result<bool>;

    /// Admin snapshot for one queue.
    async fn queue_stats(&self, asset_type: AssetType) -> Result<QueueStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_config_values() {
        assert_eq!(BackendKind::from_str("broker").unwrap(), BackendKind::Broker);
        assert_eq!(BackendKind::from_str(" Poll ").unwrap(), BackendKind::Poll);
        assert!(BackendKind::from_str("rabbit").is_err());
    }
}
