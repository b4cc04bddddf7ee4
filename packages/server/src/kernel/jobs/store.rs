//! Job store adapter: one record contract over both backends' storage.
//!
//! The store decides what "claimable" means (due, not leased, or lease
//! expired); workers stay dumb and just ask for one job at a time. All
//! implementations must treat claim-then-mutate as atomic — the memory
//! store by holding one mutex across the whole claim, the Postgres store
//! via `FOR UPDATE SKIP LOCKED`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

use super::job::{AssetType, Job, JobStatus};

/// Result of a lease-extension attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Lease extended
    Extended,
    /// The job no longer exists or already reached a terminal state
    JobGone,
    /// Another worker holds the lease; the caller has been fenced off
    NotOwner,
}

/// Read-only queue counters for the admin surface.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Normalized job record operations, regardless of backend.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job as-is. The caller owns initial state.
    async fn enqueue(&self, job: Job) -> Result<Uuid>;

    /// Atomically claim at most one claimable job of `asset_type`.
    ///
    /// Claiming sets the lease (`locked_by`, `lease_expires_at = now +
    /// lease`) and flips the status to running. A running job whose lease
    /// has expired is claimable again (crash recovery).
    async fn claim_one(
        &self,
        asset_type: AssetType,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Job>>;

    /// Extend the lease for a running job.
    async fn heartbeat(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease: Duration,
    ) -> Result<HeartbeatOutcome>;

    /// Terminal success.
    async fn mark_completed(&self, job_id: Uuid) -> Result<()>;

    /// Failed attempt. With `retry_at` the job is re-queued for another
    /// attempt (consuming one retry); without it the job fails terminally.
    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Defer the job without consuming a retry (rate-limit path).
    async fn reschedule(&self, job_id: Uuid, run_at: DateTime<Utc>) -> Result<()>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    async fn counts(&self, asset_type: AssetType) -> Result<QueueCounts>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory job table behind a single mutex.
///
/// Claim-then-mutate is atomic by construction: the mutex is held across
/// the whole scan-and-lease. Used by tests and single-process deployments.
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    /// Per-asset-type wakeups for long-polling claimers
    notifiers: HashMap<AssetType, Arc<Notify>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        let notifiers = AssetType::ALL
            .iter()
            .map(|ty| (*ty, Arc::new(Notify::new())))
            .collect();
        Self {
            jobs: Mutex::new(HashMap::new()),
            notifiers,
        }
    }

    /// Wakeup handle claimers can park on while the queue is empty.
    pub fn notifier(&self, asset_type: AssetType) -> Arc<Notify> {
        Arc::clone(&self.notifiers[&asset_type])
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, asset_type: AssetType) {
        self.notifiers[&asset_type].notify_waiters();
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: Job) -> Result<Uuid> {
        let id = job.id;
        let asset_type = job.asset_type;
        self.lock_jobs().insert(id, job);
        self.notify(asset_type);
        Ok(id)
    }

    async fn claim_one(
        &self,
        asset_type: AssetType,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut jobs = self.lock_jobs();

        let candidate = jobs
            .values()
            .filter(|job| job.asset_type == asset_type && job.is_claimable(now))
            .min_by_key(|job| job.next_run_at.unwrap_or(job.created_at))
            .map(|job| job.id);

        let Some(job) = candidate.and_then(|id| jobs.get_mut(&id)) else {
            return Ok(None);
        };

        let id = job.id;
        if let Some(previous) = job.locked_by.take() {
            warn!(
                job_id = %id,
                old_worker = %previous,
                new_worker = %worker_id,
                "reclaiming job with expired lease"
            );
        }
        job.status = JobStatus::Running;
        job.locked_by = Some(worker_id.to_string());
        job.locked_at = Some(now);
        job.lease_expires_at = Some(now + chrono::Duration::from_std(lease)?);
        job.updated_at = now;

        Ok(Some(job.clone()))
    }

    async fn heartbeat(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease: Duration,
    ) -> Result<HeartbeatOutcome> {
        let now = Utc::now();
        let mut jobs = self.lock_jobs();

        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(HeartbeatOutcome::JobGone);
        };
        if job.status != JobStatus::Running {
            return Ok(HeartbeatOutcome::JobGone);
        }
        if job.locked_by.as_deref() != Some(worker_id) {
            return Ok(HeartbeatOutcome::NotOwner);
        }

        job.lease_expires_at = Some(now + chrono::Duration::from_std(lease)?);
        job.updated_at = now;
        Ok(HeartbeatOutcome::Extended)
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<()> {
        let mut jobs = self.lock_jobs();
        if let Some(job) = jobs.get_mut(&job_id) {
            job.status = JobStatus::Completed;
            job.locked_by = None;
            job.lease_expires_at = None;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let asset_type = {
            let mut jobs = self.lock_jobs();
            let Some(job) = jobs.get_mut(&job_id) else {
                return Ok(());
            };
            job.error_message = Some(error.to_string());
            job.locked_by = None;
            job.lease_expires_at = None;
            job.updated_at = Utc::now();

            match retry_at {
                Some(at) => {
                    job.status = JobStatus::Pending;
                    job.retry_count += 1;
                    job.next_run_at = Some(at);
                    Some(job.asset_type)
                }
                None => {
                    job.status = JobStatus::Failed;
                    None
                }
            }
        };

        if let Some(asset_type) = asset_type {
            self.notify(asset_type);
        }
        Ok(())
    }

    async fn reschedule(&self, job_id: Uuid, run_at: DateTime<Utc>) -> Result<()> {
        let asset_type = {
            let mut jobs = self.lock_jobs();
            let Some(job) = jobs.get_mut(&job_id) else {
                return Ok(());
            };
            job.status = JobStatus::Pending;
            job.locked_by = None;
            job.lease_expires_at = None;
            job.next_run_at = Some(run_at);
            job.updated_at = Utc::now();
            job.asset_type
        };
        self.notify(asset_type);
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.lock_jobs().get(&job_id).cloned())
    }

    async fn counts(&self, asset_type: AssetType) -> Result<QueueCounts> {
        let now = Utc::now();
        let jobs = self.lock_jobs();
        let mut counts = QueueCounts::default();
        for job in jobs.values().filter(|job| job.asset_type == asset_type) {
            match job.status {
                JobStatus::Pending => {
                    if job.next_run_at.map_or(true, |at| at <= now) {
                        counts.waiting += 1;
                    } else {
                        counts.delayed += 1;
                    }
                }
                JobStatus::Running => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(60);

    fn bookmark_job() -> Job {
        Job::for_asset(AssetType::Bookmark, Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn claim_sets_the_lease() {
        let store = MemoryJobStore::new();
        let id = store.enqueue(bookmark_job()).await.unwrap();

        let claimed = store
            .claim_one(AssetType::Bookmark, "worker-1", LEASE)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.locked_by.as_deref(), Some("worker-1"));
        assert!(claimed.lease_expires_at.is_some());
    }

    #[tokio::test]
    async fn claimed_job_is_invisible_to_other_workers() {
        let store = MemoryJobStore::new();
        store.enqueue(bookmark_job()).await.unwrap();

        let first = store
            .claim_one(AssetType::Bookmark, "worker-1", LEASE)
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .claim_one(AssetType::Bookmark, "worker-2", LEASE)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claim_race_admits_exactly_one_worker() {
        let store = Arc::new(MemoryJobStore::new());
        store.enqueue(bookmark_job()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .claim_one(AssetType::Bookmark, &format!("worker-{i}"), LEASE)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn lease_expiry_boundary_controls_reclaim() {
        let store = MemoryJobStore::new();

        // One millisecond before expiry: not claimable.
        let mut job = bookmark_job();
        job.status = JobStatus::Running;
        job.locked_by = Some("worker-1".to_string());
        job.lease_expires_at = Some(Utc::now() + chrono::Duration::milliseconds(1));
        let id = store.enqueue(job).await.unwrap();

        assert!(store
            .claim_one(AssetType::Bookmark, "worker-2", LEASE)
            .await
            .unwrap()
            .is_none());

        // One millisecond after expiry: reclaimable.
        {
            let mut jobs = store.lock_jobs();
            let job = jobs.get_mut(&id).unwrap();
            job.lease_expires_at = Some(Utc::now() - chrono::Duration::milliseconds(1));
        }

        let reclaimed = store
            .claim_one(AssetType::Bookmark, "worker-2", LEASE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.locked_by.as_deref(), Some("worker-2"));
    }

    #[tokio::test]
    async fn heartbeat_outcomes() {
        let store = MemoryJobStore::new();
        store.enqueue(bookmark_job()).await.unwrap();
        let claimed = store
            .claim_one(AssetType::Bookmark, "worker-1", LEASE)
            .await
            .unwrap()
            .unwrap();

        let before = store.get(claimed.id).await.unwrap().unwrap().lease_expires_at;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(
            store.heartbeat(claimed.id, "worker-1", LEASE).await.unwrap(),
            HeartbeatOutcome::Extended
        );
        let after = store.get(claimed.id).await.unwrap().unwrap().lease_expires_at;
        assert!(after > before);

        assert_eq!(
            store.heartbeat(claimed.id, "worker-2", LEASE).await.unwrap(),
            HeartbeatOutcome::NotOwner
        );
        assert_eq!(
            store.heartbeat(Uuid::new_v4(), "worker-1", LEASE).await.unwrap(),
            HeartbeatOutcome::JobGone
        );
    }

    #[tokio::test]
    async fn mark_failed_with_retry_requeues_and_counts() {
        let store = MemoryJobStore::new();
        store.enqueue(bookmark_job()).await.unwrap();
        let claimed = store
            .claim_one(AssetType::Bookmark, "worker-1", LEASE)
            .await
            .unwrap()
            .unwrap();

        store
            .mark_failed(claimed.id, "upstream 503", Some(Utc::now()))
            .await
            .unwrap();

        let job = store.get(claimed.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert!(job.locked_by.is_none());
    }

    #[tokio::test]
    async fn mark_failed_terminal_keeps_error() {
        let store = MemoryJobStore::new();
        store.enqueue(bookmark_job()).await.unwrap();
        let claimed = store
            .claim_one(AssetType::Bookmark, "worker-1", LEASE)
            .await
            .unwrap()
            .unwrap();

        store
            .mark_failed(claimed.id, "unsupported media", None)
            .await
            .unwrap();

        let job = store.get(claimed.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("unsupported media"));
        assert_eq!(job.retry_count, 0);
    }

    #[tokio::test]
    async fn reschedule_defers_without_retry_cost() {
        let store = MemoryJobStore::new();
        store.enqueue(bookmark_job()).await.unwrap();
        let claimed = store
            .claim_one(AssetType::Bookmark, "worker-1", LEASE)
            .await
            .unwrap()
            .unwrap();

        let run_at = Utc::now() + chrono::Duration::seconds(30);
        store.reschedule(claimed.id, run_at).await.unwrap();

        let job = store.get(claimed.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.next_run_at, Some(run_at));

        let counts = store.counts(AssetType::Bookmark).await.unwrap();
        assert_eq!(counts.delayed, 1);
    }
}
