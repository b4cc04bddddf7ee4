//! Poll dispatch backend: long-poll claims over a leased job table.
//!
//! No broker process holds queue state; the job store rows are the queue.
//! A claim long-polls the store up to a bounded wait, a lease on the row
//! stands in for the broker's lock, and crash recovery falls out of lease
//! expiry (an expired running row is claimable again). Store errors inside
//! the claim loop back off at a fixed cadence instead of failing the
//! worker loop.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::dispatch::{DispatchBackend, QueueStats};
use super::error::ProcessingError;
use super::job::{AssetType, Job};
use super::retry::{Disposition, RetryPolicy};
use super::store::{HeartbeatOutcome, JobStore};

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Bounded wait inside `claim` before returning `None`
    pub claim_wait: Duration,
    /// Re-check cadence while the queue looks empty
    pub poll_interval: Duration,
    /// Fixed backoff after a store error inside the claim loop
    pub error_backoff: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            claim_wait: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            error_backoff: Duration::from_secs(2),
        }
    }
}

pub struct PollQueue {
    store: Arc<dyn JobStore>,
    /// Same-process wakeups; a remote store polls on cadence alone.
    notifiers: Option<HashMap<AssetType, Arc<Notify>>>,
    policy: RetryPolicy,
    config: PollConfig,
    paused: AtomicBool,
}

impl PollQueue {
    pub fn new(store: Arc<dyn JobStore>, config: PollConfig) -> Self {
        Self {
            store,
            notifiers: None,
            policy: RetryPolicy,
            config,
            paused: AtomicBool::new(false),
        }
    }

    /// Attach per-asset-type wakeups so same-process enqueues cut the poll
    /// latency to zero.
    pub fn with_notifiers(mut self, notifiers: HashMap<AssetType, Arc<Notify>>) -> Self {
        self.notifiers = Some(notifiers);
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Pause or resume delivery. Claims return `None` while paused.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn lease_for(asset_type: AssetType) -> Duration {
        asset_type.task_class().lock_duration()
    }
}

#[async_trait]
impl DispatchBackend for PollQueue {
    async fn enqueue(&self, job: Job) -> Result<Uuid> {
        self.store.enqueue(job).await
    }

    async fn claim(&self, asset_type: AssetType, worker_id: &str) -> Result<Option<Job>> {
        let deadline = Instant::now() + self.config.claim_wait;
        let lease = Self::lease_for(asset_type);

        loop {
            // Register for wakeups before the store round-trip so an
            // enqueue between "empty" and "wait" is not missed.
            let notifier = self
                .notifiers
                .as_ref()
                .map(|map| Arc::clone(&map[&asset_type]));
            let mut notified = pin!(async {
                match &notifier {
                    Some(notify) => notify.notified().await,
                    None => std::future::pending::<()>().await,
                }
            });

            let wait = if self.paused.load(Ordering::SeqCst) {
                self.config.poll_interval
            } else {
                match self.store.claim_one(asset_type, worker_id, lease).await {
                    Ok(Some(job)) => return Ok(Some(job)),
                    Ok(None) => self.config.poll_interval,
                    Err(error) => {
                        warn!(
                            asset_type = %asset_type,
                            %error,
                            "claim poll failed, backing off"
                        );
                        self.config.error_backoff
                    }
                }
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wake_at = (now + wait).min(deadline);

            tokio::select! {
                _ = tokio::time::sleep_until(wake_at) => {}
                _ = &mut notified => {}
            }
        }
    }

    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<HeartbeatOutcome> {
        let Some(job) = self.store.get(job_id).await? else {
            return Ok(HeartbeatOutcome::JobGone);
        };
        let outcome = self
            .store
            .heartbeat(job_id, worker_id, Self::lease_for(job.asset_type))
            .await?;
        if outcome == HeartbeatOutcome::NotOwner {
            warn!(job_id = %job_id, worker_id = %worker_id, "heartbeat fenced off, lease reassigned");
        }
        Ok(outcome)
    }

    async fn ack(&self, job_id: Uuid) -> Result<()> {
        self.store.mark_completed(job_id).await
    }

    async fn nack(&self, job_id: Uuid, error: &ProcessingError) -> Result<()> {
        let Some(job) = self.store.get(job_id).await? else {
            warn!(job_id = %job_id, "nack for unknown job, ignoring");
            return Ok(());
        };

        match self.policy.disposition(&job, error) {
            Disposition::Reschedule(delay) => {
                self.store
                    .reschedule(job_id, Utc::now() + chrono::Duration::from_std(delay)?)
                    .await
            }
            Disposition::Retry(delay) => {
                debug!(
                    job_id = %job_id,
                    retry_count = job.retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying job"
                );
                self.store
                    .mark_failed(
                        job_id,
                        &error.public_message(),
                        Some(Utc::now() + chrono::Duration::from_std(delay)?),
                    )
                    .await
            }
            Disposition::Fail => {
                warn!(job_id = %job_id, %error, "job failed terminally");
                self.store
                    .mark_failed(job_id, &error.public_message(), None)
                    .await
            }
            Disposition::Discard => self.store.mark_completed(job_id).await,
        }
    }

    async fn reschedule(&self, job_id: Uuid, delay: Duration) -> Result<bool> {
        if self.store.get(job_id).await?.is_none() {
            return Ok(false);
        }
        self.store
            .reschedule(job_id, Utc::now() + chrono::Duration::from_std(delay)?)
            .await?;
        Ok(true)
    }

    async fn queue_stats(&self, asset_type: AssetType) -> Result<QueueStats> {
        Ok(QueueStats {
            asset_type,
            counts: self.store.counts(asset_type).await?,
            paused: self.paused.load(Ordering::SeqCst),
        })
    }
}
