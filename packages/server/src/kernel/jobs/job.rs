//! Job model for background asset processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::time::Duration;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

/// The kind of asset a job processes. Determines which worker loop picks the
/// job up and which [`TaskClass`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "asset_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Bookmark,
    Photo,
    Document,
    Note,
    Task,
    TaskExecution,
}

impl AssetType {
    pub const ALL: [AssetType; 6] = [
        AssetType::Bookmark,
        AssetType::Photo,
        AssetType::Document,
        AssetType::Note,
        AssetType::Task,
        AssetType::TaskExecution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Bookmark => "bookmark",
            AssetType::Photo => "photo",
            AssetType::Document => "document",
            AssetType::Note => "note",
            AssetType::Task => "task",
            AssetType::TaskExecution => "task_execution",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|ty| ty.as_str() == s)
    }

    /// The execution class for lock duration, stall cadence, and backoff.
    pub fn task_class(&self) -> TaskClass {
        match self {
            AssetType::Bookmark | AssetType::Photo | AssetType::Document => TaskClass::Heavy,
            AssetType::TaskExecution => TaskClass::Execution,
            AssetType::Note | AssetType::Task => TaskClass::Light,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution class keyed off the asset type.
///
/// Content extraction and media conversion hold a job for minutes, while
/// AI-tagging a note is over in seconds; the lock/lease windows and retry
/// pacing differ accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    /// Extraction/conversion pipelines (bookmark, photo, document)
    Heavy,
    /// Scheduled task executions
    Execution,
    /// Lightweight AI tagging (note, task)
    Light,
}

impl TaskClass {
    /// Exclusive lock / lease duration while a worker owns the job.
    pub fn lock_duration(&self) -> Duration {
        match self {
            TaskClass::Heavy => Duration::from_secs(15 * 60),
            TaskClass::Execution => Duration::from_secs(10 * 60),
            TaskClass::Light => Duration::from_secs(5 * 60),
        }
    }

    /// How often the stall detector checks locks of this class.
    pub fn stall_check_interval(&self) -> Duration {
        match self {
            TaskClass::Heavy => Duration::from_secs(60),
            TaskClass::Execution => Duration::from_secs(45),
            TaskClass::Light => Duration::from_secs(30),
        }
    }

    /// Base delay for exponential retry backoff.
    pub fn retry_base_delay(&self) -> Duration {
        match self {
            TaskClass::Heavy => Duration::from_secs(5),
            TaskClass::Execution => Duration::from_secs(10),
            TaskClass::Light => Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

// ============================================================================
// Job Model
// ============================================================================

/// One unit of background work against an asset.
///
/// A job is never mutated concurrently by two workers: the lease fields
/// (`locked_by` / `lease_expires_at`) are the sole mutual-exclusion
/// mechanism, whichever dispatch backend is active.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    // Core identity
    pub asset_type: AssetType,
    pub asset_id: Uuid,
    pub owner_id: Uuid,

    // Payload, interpreted by the asset processor
    #[builder(default = serde_json::Value::Null)]
    pub payload: serde_json::Value,

    // Execution state
    #[builder(default)]
    pub status: JobStatus,
    #[builder(default = 0)]
    pub retry_count: i32,
    #[builder(default = 3)]
    pub max_retries: i32,
    #[builder(default, setter(strip_option))]
    pub next_run_at: Option<DateTime<Utc>>,

    // Lease management
    #[builder(default, setter(strip_option))]
    pub locked_by: Option<String>,
    #[builder(default, setter(strip_option))]
    pub locked_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub lease_expires_at: Option<DateTime<Utc>>,

    // Error tracking
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,

    // Timestamps
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Convenience constructor for an immediately-runnable job.
    pub fn for_asset(asset_type: AssetType, asset_id: Uuid, owner_id: Uuid) -> Self {
        Self::builder()
            .asset_type(asset_type)
            .asset_id(asset_id)
            .owner_id(owner_id)
            .build()
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn task_class(&self) -> TaskClass {
        self.asset_type.task_class()
    }

    /// Whether the job can be claimed right now.
    ///
    /// Claimable iff pending and due, or running with an expired lease
    /// (crash recovery).
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Pending => self.next_run_at.map_or(true, |at| at <= now),
            JobStatus::Running => self.lease_expires_at.map_or(false, |at| at < now),
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }

    /// Whether `worker_id` currently owns this job's lease.
    pub fn is_owned_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Running && self.locked_by.as_deref() == Some(worker_id)
    }

    /// Whether another fatal failure should be retried.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::for_asset(AssetType::Bookmark, Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn new_job_starts_pending_with_defaults() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.locked_by.is_none());
    }

    #[test]
    fn pending_job_without_schedule_is_claimable() {
        let job = sample_job();
        assert!(job.is_claimable(Utc::now()));
    }

    #[test]
    fn scheduled_job_is_not_claimable_before_due() {
        let mut job = sample_job();
        job.next_run_at = Some(Utc::now() + chrono::Duration::seconds(60));
        assert!(!job.is_claimable(Utc::now()));
    }

    #[test]
    fn running_job_with_live_lease_is_not_claimable() {
        let mut job = sample_job();
        job.status = JobStatus::Running;
        job.locked_by = Some("worker-1".to_string());
        job.lease_expires_at = Some(Utc::now() + chrono::Duration::seconds(60));
        assert!(!job.is_claimable(Utc::now()));
    }

    #[test]
    fn running_job_with_expired_lease_is_claimable() {
        let mut job = sample_job();
        job.status = JobStatus::Running;
        job.locked_by = Some("worker-1".to_string());
        job.lease_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(job.is_claimable(Utc::now()));
    }

    #[test]
    fn terminal_jobs_are_never_claimable() {
        let mut job = sample_job();
        job.status = JobStatus::Completed;
        assert!(!job.is_claimable(Utc::now()));
        job.status = JobStatus::Failed;
        assert!(!job.is_claimable(Utc::now()));
    }

    #[test]
    fn task_class_mapping_follows_asset_weight() {
        assert_eq!(AssetType::Bookmark.task_class(), TaskClass::Heavy);
        assert_eq!(AssetType::Photo.task_class(), TaskClass::Heavy);
        assert_eq!(AssetType::Document.task_class(), TaskClass::Heavy);
        assert_eq!(AssetType::TaskExecution.task_class(), TaskClass::Execution);
        assert_eq!(AssetType::Note.task_class(), TaskClass::Light);
        assert_eq!(AssetType::Task.task_class(), TaskClass::Light);
    }

    #[test]
    fn class_windows_are_ordered_by_weight() {
        assert!(TaskClass::Heavy.lock_duration() > TaskClass::Execution.lock_duration());
        assert!(TaskClass::Execution.lock_duration() > TaskClass::Light.lock_duration());
    }

    #[test]
    fn asset_type_round_trips_through_str() {
        for ty in AssetType::ALL {
            assert_eq!(AssetType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(AssetType::parse("widget"), None);
    }
}
