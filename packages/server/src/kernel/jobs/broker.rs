//! Broker dispatch backend: push-based in-memory queue with per-job locks.
//!
//! Jobs wait in per-asset-type queues; a claim takes an exclusive lock
//! whose duration is keyed by task class. A background stall detector polls
//! at a class-specific cadence and handles locks that were never renewed:
//! the first stall re-queues the job (the attempt was lost with its
//! worker), the second marks it failed (`max_stalled_count = 1`).
//!
//! All in-memory deadlines use `tokio::time::Instant`, so paused-time tests
//! observe exact windows. Completed/failed history is capped to bound
//! memory.

use std::collections::{HashMap, VecDeque};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatch::{DispatchBackend, QueueStats};
use super::error::ProcessingError;
use super::job::{AssetType, Job, JobStatus, TaskClass};
use super::retry::{Disposition, RetryPolicy};
use super::store::{HeartbeatOutcome, QueueCounts};

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bounded wait inside `claim` before returning `None`
    pub claim_wait: Duration,
    /// Stalls tolerated before a job is failed outright
    pub max_stalled_count: u32,
    /// Completed-history cap
    pub completed_history: usize,
    /// Failed-history cap
    pub failed_history: usize,
    /// Test hook: override the class-keyed lock duration
    pub lock_override: Option<Duration>,
    /// Test hook: override the class-keyed stall-check cadence
    pub stall_check_override: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            claim_wait: Duration::from_secs(30),
            max_stalled_count: 1,
            completed_history: 1_000,
            failed_history: 5_000,
            lock_override: None,
            stall_check_override: None,
        }
    }
}

struct ActiveLock {
    job: Job,
    worker_id: String,
    lock_expires_at: Instant,
}

struct DelayedJob {
    due: Instant,
    job: Job,
}

#[derive(Debug, Clone)]
struct FailedEntry {
    job_id: Uuid,
    asset_type: AssetType,
    error: String,
}

#[derive(Default)]
struct BrokerState {
    waiting: HashMap<AssetType, VecDeque<Job>>,
    delayed: Vec<DelayedJob>,
    active: HashMap<Uuid, ActiveLock>,
    /// Stalls observed per job, surviving re-queues; cleared on ack/nack.
    stalls: HashMap<Uuid, u32>,
    completed: VecDeque<(Uuid, AssetType)>,
    failed: VecDeque<FailedEntry>,
    paused: bool,
}

pub struct BrokerQueue {
    state: Mutex<BrokerState>,
    notifiers: HashMap<AssetType, Arc<Notify>>,
    policy: RetryPolicy,
    config: BrokerConfig,
}

impl BrokerQueue {
    pub fn new(config: BrokerConfig) -> Self {
        let notifiers = AssetType::ALL
            .iter()
            .map(|ty| (*ty, Arc::new(Notify::new())))
            .collect();
        Self {
            state: Mutex::new(BrokerState::default()),
            notifiers,
            policy: RetryPolicy,
            config,
        }
    }

    /// Spawn one stall detector per task class.
    ///
    /// Each loop ticks at the class cadence and sweeps expired locks for
    /// assets of that class until `shutdown` fires.
    pub fn spawn_stall_detectors(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        [TaskClass::Heavy, TaskClass::Execution, TaskClass::Light]
            .into_iter()
            .map(|class| {
                let broker = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let interval = broker
                        .config
                        .stall_check_override
                        .unwrap_or_else(|| class.stall_check_interval());
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(interval) => broker.sweep_stalled(class),
                        }
                    }
                })
            })
            .collect()
    }

    /// Pause or resume delivery. Claims return `None` while paused.
    pub fn set_paused(&self, paused: bool) {
        self.lock_state().paused = paused;
        info!(paused, "broker queue pause flag changed");
    }

    fn lock_state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_duration(&self, class: TaskClass) -> Duration {
        self.config.lock_override.unwrap_or_else(|| class.lock_duration())
    }

    /// Move due delayed jobs to the front of their waiting queues.
    fn promote_due(state: &mut BrokerState, now: Instant) {
        let mut idx = 0;
        while idx < state.delayed.len() {
            if state.delayed[idx].due <= now {
                let entry = state.delayed.swap_remove(idx);
                state
                    .waiting
                    .entry(entry.job.asset_type)
                    .or_default()
                    .push_back(entry.job);
            } else {
                idx += 1;
            }
        }
    }

    fn try_claim(&self, asset_type: AssetType, worker_id: &str) -> Option<Job> {
        let now = Instant::now();
        let mut state = self.lock_state();
        Self::promote_due(&mut state, now);

        if state.paused {
            return None;
        }

        let mut job = state.waiting.get_mut(&asset_type)?.pop_front()?;
        job.status = JobStatus::Running;
        job.locked_by = Some(worker_id.to_string());
        job.locked_at = Some(Utc::now());

        let lock = self.lock_duration(asset_type.task_class());
        // Informational only; the broker's source of truth is the Instant.
        job.lease_expires_at = chrono::Duration::from_std(lock)
            .ok()
            .map(|d| Utc::now() + d);

        state.active.insert(
            job.id,
            ActiveLock {
                job: job.clone(),
                worker_id: worker_id.to_string(),
                lock_expires_at: now + lock,
            },
        );
        Some(job)
    }

    /// Earliest wakeup needed for a delayed job of this type, if any.
    fn next_due(&self, asset_type: AssetType) -> Option<Instant> {
        let state = self.lock_state();
        state
            .delayed
            .iter()
            .filter(|entry| entry.job.asset_type == asset_type)
            .map(|entry| entry.due)
            .min()
    }

    fn sweep_stalled(&self, class: TaskClass) {
        let now = Instant::now();
        let mut state = self.lock_state();

        let stalled: Vec<Uuid> = state
            .active
            .iter()
            .filter(|(_, lock)| {
                lock.job.task_class() == class && lock.lock_expires_at <= now
            })
            .map(|(id, _)| *id)
            .collect();

        for id in stalled {
            let Some(lock) = state.active.remove(&id) else {
                continue;
            };
            // The tally must outlive this lock: a re-queued job that stalls
            // again under a fresh claim is the same defect, not a new one.
            let stall_count = {
                let tally = state.stalls.entry(id).or_insert(0);
                *tally += 1;
                *tally
            };

            if stall_count > self.config.max_stalled_count {
                warn!(
                    job_id = %id,
                    worker_id = %lock.worker_id,
                    "job stalled more than allowable limit, failing"
                );
                state.stalls.remove(&id);
                push_capped(
                    &mut state.failed,
                    FailedEntry {
                        job_id: id,
                        asset_type: lock.job.asset_type,
                        error: "job stalled more than allowable limit".to_string(),
                    },
                    self.config.failed_history,
                );
            } else {
                warn!(
                    job_id = %id,
                    worker_id = %lock.worker_id,
                    stall_count,
                    "stalled job re-queued"
                );
                let mut job = lock.job;
                let asset_type = job.asset_type;
                job.status = JobStatus::Pending;
                job.locked_by = None;
                job.lease_expires_at = None;
                // Front of the queue: the attempt was lost, not superseded.
                state.waiting.entry(asset_type).or_default().push_front(job);
                drop(state);
                self.notifiers[&asset_type].notify_waiters();
                state = self.lock_state();
            }
        }
    }

    /// Close out a claim: drops the lock and the job's stall tally.
    fn finish_active(&self, job_id: Uuid) -> Option<ActiveLock> {
        let mut state = self.lock_state();
        state.stalls.remove(&job_id);
        state.active.remove(&job_id)
    }

    /// Terminal failures retained in the bounded history, oldest first.
    pub fn failed_jobs(&self) -> Vec<(Uuid, String)> {
        self.lock_state()
            .failed
            .iter()
            .map(|entry| (entry.job_id, entry.error.clone()))
            .collect()
    }
}

fn push_capped<T>(queue: &mut VecDeque<T>, item: T, cap: usize) {
    queue.push_back(item);
    while queue.len() > cap {
        queue.pop_front();
    }
}

#[async_trait]
impl DispatchBackend for BrokerQueue {
    async fn enqueue(&self, job: Job) -> Result<Uuid> {
        let id = job.id;
        let asset_type = job.asset_type;
        {
            let mut state = self.lock_state();
            state.waiting.entry(asset_type).or_default().push_back(job);
        }
        self.notifiers[&asset_type].notify_waiters();
        debug!(job_id = %id, asset_type = %asset_type, "job enqueued");
        Ok(id)
    }

    async fn claim(&self, asset_type: AssetType, worker_id: &str) -> Result<Option<Job>> {
        let deadline = Instant::now() + self.config.claim_wait;

        loop {
            let mut notified = pin!(self.notifiers[&asset_type].notified());
            notified.as_mut().enable();

            if let Some(job) = self.try_claim(asset_type, worker_id) {
                return Ok(Some(job));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            // Wake at the deadline, when a delayed job comes due, or when
            // something is pushed/released — whichever happens first.
            let wake_at = self
                .next_due(asset_type)
                .filter(|due| *due < deadline)
                .unwrap_or(deadline);

            tokio::select! {
                _ = tokio::time::sleep_until(wake_at) => {}
                _ = &mut notified => {}
            }
        }
    }

    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<HeartbeatOutcome> {
        let mut state = self.lock_state();
        match state.active.get_mut(&job_id) {
            Some(lock) if lock.worker_id == worker_id => {
                lock.lock_expires_at =
                    Instant::now() + self.lock_duration(lock.job.task_class());
                Ok(HeartbeatOutcome::Extended)
            }
            Some(_) => {
                warn!(job_id = %job_id, worker_id = %worker_id, "heartbeat from non-owner");
                Ok(HeartbeatOutcome::NotOwner)
            }
            None => {
                // Completed, stalled out, or never ours.
                debug!(job_id = %job_id, "heartbeat for unknown job");
                Ok(HeartbeatOutcome::JobGone)
            }
        }
    }

    async fn ack(&self, job_id: Uuid) -> Result<()> {
        if let Some(lock) = self.finish_active(job_id) {
            let mut state = self.lock_state();
            push_capped(
                &mut state.completed,
                (job_id, lock.job.asset_type),
                self.config.completed_history,
            );
        } else {
            warn!(job_id = %job_id, "ack for job not active, ignoring");
        }
        Ok(())
    }

    async fn nack(&self, job_id: Uuid, error: &ProcessingError) -> Result<()> {
        let Some(lock) = self.finish_active(job_id) else {
            warn!(job_id = %job_id, "nack for job not active, ignoring");
            return Ok(());
        };
        let mut job = lock.job;

        match self.policy.disposition(&job, error) {
            Disposition::Reschedule(delay) => {
                job.status = JobStatus::Pending;
                job.locked_by = None;
                job.lease_expires_at = None;
                let mut state = self.lock_state();
                state.delayed.push(DelayedJob {
                    due: Instant::now() + delay,
                    job,
                });
            }
            Disposition::Retry(delay) => {
                job.status = JobStatus::Pending;
                job.retry_count += 1;
                job.locked_by = None;
                job.lease_expires_at = None;
                job.error_message = Some(error.public_message());
                debug!(job_id = %job_id, retry_count = job.retry_count, delay_ms = delay.as_millis() as u64, "retrying job");
                let mut state = self.lock_state();
                state.delayed.push(DelayedJob {
                    due: Instant::now() + delay,
                    job,
                });
            }
            Disposition::Fail => {
                warn!(job_id = %job_id, error = %error, "job failed terminally");
                let mut state = self.lock_state();
                push_capped(
                    &mut state.failed,
                    FailedEntry {
                        job_id,
                        asset_type: job.asset_type,
                        error: error.public_message(),
                    },
                    self.config.failed_history,
                );
            }
            Disposition::Discard => {
                let mut state = self.lock_state();
                push_capped(
                    &mut state.completed,
                    (job_id, job.asset_type),
                    self.config.completed_history,
                );
            }
        }
        Ok(())
    }

    async fn reschedule(&self, job_id: Uuid, delay: Duration) -> Result<bool> {
        let Some(lock) = self.finish_active(job_id) else {
            warn!(job_id = %job_id, "reschedule for job not active, ignoring");
            return Ok(false);
        };
        let mut job = lock.job;
        job.status = JobStatus::Pending;
        job.locked_by = None;
        job.lease_expires_at = None;

        let mut state = self.lock_state();
        state.delayed.push(DelayedJob {
            due: Instant::now() + delay,
            job,
        });
        Ok(true)
    }

    async fn queue_stats(&self, asset_type: AssetType) -> Result<QueueStats> {
        let state = self.lock_state();
        let counts = QueueCounts {
            waiting: state
                .waiting
                .get(&asset_type)
                .map_or(0, |queue| queue.len() as u64),
            active: state
                .active
                .values()
                .filter(|lock| lock.job.asset_type == asset_type)
                .count() as u64,
            delayed: state
                .delayed
                .iter()
                .filter(|entry| entry.job.asset_type == asset_type)
                .count() as u64,
            // Caps are global; counts are reported per asset type.
            completed: state
                .completed
                .iter()
                .filter(|(_, ty)| *ty == asset_type)
                .count() as u64,
            failed: state
                .failed
                .iter()
                .filter(|entry| entry.asset_type == asset_type)
                .count() as u64,
        };
        Ok(QueueStats {
            asset_type,
            counts,
            paused: state.paused,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_broker(config: BrokerConfig) -> Arc<BrokerQueue> {
        Arc::new(BrokerQueue::new(config))
    }

    fn note_job() -> Job {
        Job::for_asset(AssetType::Note, Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_claim_ack_round_trip() {
        let broker = test_broker(BrokerConfig::default());
        let id = broker.enqueue(note_job()).await.unwrap();

        let claimed = broker
            .claim(AssetType::Note, "worker-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.locked_by.as_deref(), Some("worker-1"));

        broker.ack(id).await.unwrap();
        let stats = broker.queue_stats(AssetType::Note).await.unwrap();
        assert_eq!(stats.counts.active, 0);
        assert_eq!(stats.counts.completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn claim_times_out_with_none() {
        let broker = test_broker(BrokerConfig {
            claim_wait: Duration::from_millis(200),
            ..Default::default()
        });

        let start = Instant::now();
        let claimed = broker.claim(AssetType::Photo, "worker-1").await.unwrap();
        assert!(claimed.is_none());
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn claim_wakes_on_enqueue() {
        let broker = test_broker(BrokerConfig::default());
        let broker2 = Arc::clone(&broker);

        let claimer =
            tokio::spawn(async move { broker2.claim(AssetType::Note, "worker-1").await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        broker.enqueue(note_job()).await.unwrap();

        let claimed = claimer.await.unwrap().unwrap();
        assert!(claimed.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn nack_transient_requeues_with_backoff() {
        let broker = test_broker(BrokerConfig {
            claim_wait: Duration::from_millis(10),
            ..Default::default()
        });
        let id = broker.enqueue(note_job()).await.unwrap();
        broker.claim(AssetType::Note, "worker-1").await.unwrap().unwrap();

        let err = ProcessingError::transient(anyhow::anyhow!("upstream 503"));
        broker.nack(id, &err).await.unwrap();

        let stats = broker.queue_stats(AssetType::Note).await.unwrap();
        assert_eq!(stats.counts.delayed, 1);

        // Note is Light: base 1s, first retry due after 1s.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let retried = broker
            .claim(AssetType::Note, "worker-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retried.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn nack_exhausted_fails_terminally() {
        let broker = test_broker(BrokerConfig {
            claim_wait: Duration::from_millis(10),
            ..Default::default()
        });
        let mut job = note_job();
        job.retry_count = 3; // already exhausted
        let id = broker.enqueue(job).await.unwrap();
        broker.claim(AssetType::Note, "worker-1").await.unwrap().unwrap();

        let err = ProcessingError::transient(anyhow::anyhow!("upstream 503"));
        broker.nack(id, &err).await.unwrap();

        let stats = broker.queue_stats(AssetType::Note).await.unwrap();
        assert_eq!(stats.counts.failed, 1);
        assert_eq!(stats.counts.delayed, 0);
        assert_eq!(broker.failed_jobs(), vec![(id, "upstream 503".to_string())]);

        // Terminal: nothing further to claim.
        assert!(broker.claim(AssetType::Note, "worker-1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_does_not_consume_retries() {
        let broker = test_broker(BrokerConfig {
            claim_wait: Duration::from_millis(10),
            ..Default::default()
        });
        let id = broker.enqueue(note_job()).await.unwrap();
        broker.claim(AssetType::Note, "worker-1").await.unwrap().unwrap();

        broker.reschedule(id, Duration::from_secs(5)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5100)).await;
        let again = broker
            .claim(AssetType::Note, "worker-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stall_detector_requeues_then_fails() {
        let broker = test_broker(BrokerConfig {
            claim_wait: Duration::from_millis(10),
            lock_override: Some(Duration::from_millis(100)),
            stall_check_override: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        let handles = broker.spawn_stall_detectors(shutdown.clone());

        let id = broker.enqueue(note_job()).await.unwrap();
        broker.claim(AssetType::Note, "worker-1").await.unwrap().unwrap();

        // First stall: the job is re-queued, not failed.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let reclaimed = broker
            .claim(AssetType::Note, "worker-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.id, id);

        // Second stall: single-stall tolerance exceeded, job fails.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(broker.claim(AssetType::Note, "worker-3").await.unwrap().is_none());
        let stats = broker.queue_stats(AssetType::Note).await.unwrap();
        assert_eq!(stats.counts.failed, 1);
        assert_eq!(
            broker.failed_jobs(),
            vec![(id, "job stalled more than allowable limit".to_string())]
        );

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn finished_attempt_resets_stall_tolerance() {
        let broker = test_broker(BrokerConfig {
            claim_wait: Duration::from_millis(10),
            lock_override: Some(Duration::from_millis(100)),
            stall_check_override: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        broker.spawn_stall_detectors(shutdown.clone());

        let id = broker.enqueue(note_job()).await.unwrap();
        broker.claim(AssetType::Note, "worker-1").await.unwrap().unwrap();

        // One stall, then the reclaiming worker nacks normally.
        tokio::time::sleep(Duration::from_millis(300)).await;
        broker.claim(AssetType::Note, "worker-2").await.unwrap().unwrap();
        let err = ProcessingError::transient(anyhow::anyhow!("upstream 503"));
        broker.nack(id, &err).await.unwrap();

        // The nack cleared the tally, so the next claim gets a fresh
        // single-stall allowance: a stall re-queues instead of failing.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        broker.claim(AssetType::Note, "worker-3").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let reclaimed = broker
            .claim(AssetType::Note, "worker-4")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.id, id);
        assert!(broker.failed_jobs().is_empty());

        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_prevents_stall() {
        let broker = test_broker(BrokerConfig {
            claim_wait: Duration::from_millis(10),
            lock_override: Some(Duration::from_millis(100)),
            stall_check_override: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let shutdown = CancellationToken::new();
        broker.spawn_stall_detectors(shutdown.clone());

        let id = broker.enqueue(note_job()).await.unwrap();
        broker.claim(AssetType::Note, "worker-1").await.unwrap().unwrap();

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            broker.heartbeat(id, "worker-1").await.unwrap();
        }

        let stats = broker.queue_stats(AssetType::Note).await.unwrap();
        assert_eq!(stats.counts.active, 1);
        assert_eq!(stats.counts.failed, 0);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn paused_queue_delivers_nothing() {
        let broker = test_broker(BrokerConfig {
            claim_wait: Duration::from_millis(50),
            ..Default::default()
        });
        broker.enqueue(note_job()).await.unwrap();
        broker.set_paused(true);

        assert!(broker.claim(AssetType::Note, "worker-1").await.unwrap().is_none());

        broker.set_paused(false);
        assert!(broker.claim(AssetType::Note, "worker-1").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn history_counts_are_per_asset_type() {
        let broker = test_broker(BrokerConfig {
            claim_wait: Duration::from_millis(10),
            ..Default::default()
        });

        let note = broker.enqueue(note_job()).await.unwrap();
        broker.claim(AssetType::Note, "worker-1").await.unwrap().unwrap();
        broker.ack(note).await.unwrap();

        let mut photo = Job::for_asset(AssetType::Photo, Uuid::new_v4(), Uuid::new_v4());
        photo.retry_count = 3; // exhausted
        let photo = broker.enqueue(photo).await.unwrap();
        broker.claim(AssetType::Photo, "worker-1").await.unwrap().unwrap();
        let err = ProcessingError::transient(anyhow::anyhow!("upstream 503"));
        broker.nack(photo, &err).await.unwrap();

        let note_stats = broker.queue_stats(AssetType::Note).await.unwrap();
        assert_eq!(note_stats.counts.completed, 1);
        assert_eq!(note_stats.counts.failed, 0);

        let photo_stats = broker.queue_stats(AssetType::Photo).await.unwrap();
        assert_eq!(photo_stats.counts.completed, 0);
        assert_eq!(photo_stats.counts.failed, 1);
    }

    #[tokio::test]
    async fn history_is_capped() {
        let broker = test_broker(BrokerConfig {
            claim_wait: Duration::from_millis(1),
            completed_history: 5,
            ..Default::default()
        });

        for _ in 0..10 {
            let id = broker.enqueue(note_job()).await.unwrap();
            broker.claim(AssetType::Note, "worker-1").await.unwrap().unwrap();
            broker.ack(id).await.unwrap();
        }

        let stats = broker.queue_stats(AssetType::Note).await.unwrap();
        assert_eq!(stats.counts.completed, 5);
    }
}
