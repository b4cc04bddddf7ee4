//! Worker loop: claims jobs for one asset type and runs its processor.
//!
//! One loop per asset type, with bounded in-flight concurrency. Blocking
//! happens at exactly two points the loop owns: the backend claim (bounded
//! wait) and the concurrency slot. While a job runs, a spawned heartbeat
//! task renews the claim; the processor never sees lease mechanics.
//!
//! A processor error never escapes the loop — it is translated into a
//! retry-policy outcome and reported back to the dispatch backend:
//!
//! ```text
//! Worker
//!     │
//!     ├─► backend.claim(asset_type)
//!     ├─► processor.process(JobContext)   (heartbeat task alongside)
//!     └─► Ok        → backend.ack
//!         RateLimited → backend.reschedule (no retry cost)
//!         otherwise → backend.nack; terminal failures also fail the
//!                     active stage and the job via the reporter
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dispatch::DispatchBackend;
use super::error::ProcessingError;
use super::job::{AssetType, Job};
use super::retry::{Disposition, RetryPolicy};
use super::store::HeartbeatOutcome;
use crate::kernel::stages::ProcessingReporter;

/// Everything a processor gets handed per claimed job.
#[derive(Clone)]
pub struct JobContext {
    pub job: Job,
    pub reporter: Arc<ProcessingReporter>,
}

/// One asset pipeline. Implementations drive the reporter through their
/// stages and consult the admission gate before outbound fetches.
#[async_trait::async_trait]
pub trait AssetProcessor: Send + Sync {
    fn asset_type(&self) -> AssetType;

    async fn process(&self, ctx: JobContext) -> Result<(), ProcessingError>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// In-flight jobs per loop, clamped to 1..=5
    pub concurrency: usize,
    /// How often to renew the claim on a running job
    pub heartbeat_interval: Duration,
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            heartbeat_interval: Duration::from_secs(60),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

pub struct Worker {
    backend: Arc<dyn DispatchBackend>,
    processor: Arc<dyn AssetProcessor>,
    reporter: Arc<ProcessingReporter>,
    policy: RetryPolicy,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        backend: Arc<dyn DispatchBackend>,
        processor: Arc<dyn AssetProcessor>,
        reporter: Arc<ProcessingReporter>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            backend,
            processor,
            reporter,
            policy: RetryPolicy,
            config,
        }
    }

    /// Run until `shutdown` fires, then drain in-flight jobs.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let asset_type = self.processor.asset_type();
        let concurrency = self.config.concurrency.clamp(1, 5);
        let slots = Arc::new(Semaphore::new(concurrency));

        info!(
            worker_id = %self.config.worker_id,
            asset_type = %asset_type,
            concurrency,
            "worker loop starting"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let claimed = tokio::select! {
                _ = shutdown.cancelled() => break,
                claimed = self.backend.claim(asset_type, &self.config.worker_id) => claimed,
            };

            match claimed {
                Ok(Some(job)) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        worker.process_job(job).await;
                        drop(permit);
                    });
                }
                // The normal empty-queue outcome; loop straight back in.
                Ok(None) => drop(permit),
                Err(error) => {
                    error!(asset_type = %asset_type, %error, "claim failed");
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        // Drain: every slot free means every spawned job finished.
        let _ = slots.acquire_many(concurrency as u32).await;
        info!(worker_id = %self.config.worker_id, asset_type = %asset_type, "worker loop stopped");
    }

    async fn process_job(&self, job: Job) {
        let job_id = job.id;
        let ctx = JobContext {
            job: job.clone(),
            reporter: Arc::clone(&self.reporter),
        };

        let result = self.execute_with_heartbeat(job_id, ctx).await;

        match result {
            Ok(()) => {
                debug!(job_id = %job_id, "job succeeded");
                if let Err(error) = self.backend.ack(job_id).await {
                    error!(job_id = %job_id, %error, "failed to ack job");
                }
            }
            Err(ref processing_error) => {
                self.handle_failure(&job, processing_error).await;
            }
        }

        self.reporter.forget(job_id);
    }

    async fn handle_failure(&self, job: &Job, error: &ProcessingError) {
        let job_id = job.id;
        match self.policy.disposition(job, error) {
            Disposition::Reschedule(delay) => {
                debug!(job_id = %job_id, delay_ms = delay.as_millis() as u64, "rescheduling rate-limited job");
                if let Err(error) = self.backend.reschedule(job_id, delay).await {
                    error!(job_id = %job_id, %error, "failed to reschedule job");
                }
            }
            Disposition::Retry(_) => {
                warn!(job_id = %job_id, %error, "job attempt failed, will retry");
                if let Err(error) = self.backend.nack(job_id, error).await {
                    error!(job_id = %job_id, %error, "failed to nack job");
                }
            }
            Disposition::Fail => {
                warn!(job_id = %job_id, %error, "job failed terminally");
                let message = error.public_message();
                if let Err(error) = self.reporter.report_error(job_id, &message).await {
                    warn!(job_id = %job_id, %error, "could not fail active stage");
                }
                if let Err(error) = self.reporter.fail_job(job_id, job.asset_id, &message).await {
                    warn!(job_id = %job_id, %error, "could not record job failure");
                }
                if let Err(error) = self.backend.nack(job_id, error).await {
                    error!(job_id = %job_id, %error, "failed to nack job");
                }
            }
            Disposition::Discard => {
                warn!(job_id = %job_id, "asset gone mid-job, discarding");
                if let Err(error) = self.backend.nack(job_id, error).await {
                    error!(job_id = %job_id, %error, "failed to discard job");
                }
            }
        }
    }

    /// Run the processor with a heartbeat task renewing the claim.
    async fn execute_with_heartbeat(
        &self,
        job_id: Uuid,
        ctx: JobContext,
    ) -> Result<(), ProcessingError> {
        let backend = Arc::clone(&self.backend);
        let worker_id = self.config.worker_id.clone();
        let heartbeat_interval = self.config.heartbeat_interval;

        let cancel = CancellationToken::new();
        let heartbeat_cancel = cancel.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.tick().await; // skip the immediate first tick

            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match backend.heartbeat(job_id, &worker_id).await {
                            Ok(HeartbeatOutcome::Extended) => {}
                            Ok(outcome) => {
                                warn!(job_id = %job_id, ?outcome, "claim not renewed");
                            }
                            Err(error) => {
                                warn!(job_id = %job_id, %error, "heartbeat failed");
                            }
                        }
                    }
                }
            }
        });

        let result = self.processor.process(ctx).await;

        cancel.cancel();
        let _ = heartbeat_handle.await;

        result
    }
}
