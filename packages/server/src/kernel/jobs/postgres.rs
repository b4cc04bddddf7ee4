//! PostgreSQL-backed job store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers never race on
//! the same row, and a running row whose lease expired is recovered in the
//! same statement.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::job::{AssetType, Job, JobStatus};
use super::store::{HeartbeatOutcome, JobStore, QueueCounts};

const JOB_COLUMNS: &str = r#"id, asset_type, asset_id, owner_id, payload, status, retry_count,
    max_retries, next_run_at, locked_by, locked_at, lease_expires_at,
    error_message, created_at, updated_at"#;

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn enqueue(&self, job: Job) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, asset_type, asset_id, owner_id, payload, status, retry_count,
                max_retries, next_run_at, locked_by, locked_at, lease_expires_at,
                error_message, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(job.id)
        .bind(job.asset_type)
        .bind(job.asset_id)
        .bind(job.owner_id)
        .bind(&job.payload)
        .bind(job.status)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(job.next_run_at)
        .bind(&job.locked_by)
        .bind(job.locked_at)
        .bind(job.lease_expires_at)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(job.id)
    }

    async fn claim_one(
        &self,
        asset_type: AssetType,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            WITH next_job AS (
                SELECT id
                FROM jobs
                WHERE asset_type = $1
                  AND (
                    (status = 'pending' AND (next_run_at IS NULL OR next_run_at <= NOW()))
                    OR (status = 'running' AND lease_expires_at < NOW())
                  )
                ORDER BY COALESCE(next_run_at, created_at)
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET
                status = 'running',
                locked_by = $2,
                locked_at = NOW(),
                lease_expires_at = NOW() + ($3 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_job)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(asset_type)
        .bind(worker_id)
        .bind((lease.as_millis() as i64).to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn heartbeat(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease: Duration,
    ) -> Result<HeartbeatOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + ($1 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $2 AND status = 'running' AND locked_by = $3
            "#,
        )
        .bind((lease.as_millis() as i64).to_string())
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(HeartbeatOutcome::Extended);
        }

        // Distinguish "job gone" from "someone else owns the lease".
        let status: Option<(JobStatus, Option<String>)> =
            sqlx::query_as("SELECT status, locked_by FROM jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        match status {
            Some((JobStatus::Running, Some(owner))) if owner != worker_id => {
                Ok(HeartbeatOutcome::NotOwner)
            }
            _ => Ok(HeartbeatOutcome::JobGone),
        }
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                locked_by = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        match retry_at {
            Some(at) => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'pending',
                        retry_count = retry_count + 1,
                        next_run_at = $1,
                        error_message = $2,
                        locked_by = NULL,
                        lease_expires_at = NULL,
                        updated_at = NOW()
                    WHERE id = $3
                    "#,
                )
                .bind(at)
                .bind(error)
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'failed',
                        error_message = $1,
                        locked_by = NULL,
                        lease_expires_at = NULL,
                        updated_at = NOW()
                    WHERE id = $2
                    "#,
                )
                .bind(error)
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn reschedule(&self, job_id: Uuid, run_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                next_run_at = $1,
                locked_by = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(run_at)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn counts(&self, asset_type: AssetType) -> Result<QueueCounts> {
        let rows: Vec<(JobStatus, Option<DateTime<Utc>>, i64)> = sqlx::query_as(
            r#"
            SELECT status, MIN(next_run_at), COUNT(*)
            FROM jobs
            WHERE asset_type = $1
            GROUP BY status, (next_run_at IS NOT NULL AND next_run_at > NOW())
            "#,
        )
        .bind(asset_type)
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let mut counts = QueueCounts::default();
        for (status, next_run_at, count) in rows {
            let count = count as u64;
            match status {
                JobStatus::Pending => {
                    if next_run_at.map_or(false, |at| at > now) {
                        counts.delayed += count;
                    } else {
                        counts.waiting += count;
                    }
                }
                JobStatus::Running => counts.active += count,
                JobStatus::Completed => counts.completed += count,
                JobStatus::Failed => counts.failed += count,
            }
        }
        Ok(counts)
    }
}
