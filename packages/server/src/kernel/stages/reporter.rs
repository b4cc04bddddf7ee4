//! Processing reporter: per-job ordered stage tracking with live events.
//!
//! Stages live in an ordered arena (vector plus name index); the only
//! runtime mutation besides status updates is a single mid-flight
//! extension, inserted after the last stage that has started. Every
//! transition mirrors onto the asset record and publishes to the asset's
//! stream topic. A deleted asset downgrades persistence to a warning;
//! processing itself never stops because nobody is watching.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use super::stage::{Stage, StageEvent, StageStatus};
use super::status_store::{AssetStatusStore, StatusUpdate};
use crate::kernel::stream_hub::{asset_topic, StreamHub};

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("job {0} already initialized")]
    AlreadyInitialized(Uuid),
    #[error("job {0} is not tracked")]
    UnknownJob(Uuid),
    #[error("job {job_id} has no stage named '{name}'")]
    UnknownStage { job_id: Uuid, name: String },
    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),
    #[error("stage '{name}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        name: String,
        from: StageStatus,
        to: StageStatus,
    },
    #[error("stage list for job {0} was already extended")]
    AlreadyExtended(Uuid),
    #[error("job {0} already reached a terminal state")]
    TerminalJob(Uuid),
    #[error(transparent)]
    Status(#[from] anyhow::Error),
}

struct JobProgress {
    asset_id: Uuid,
    stages: Vec<Stage>,
    index: HashMap<String, usize>,
    artifacts: Map<String, Value>,
    extended: bool,
    terminal: bool,
}

impl JobProgress {
    fn stage_mut(&mut self, job_id: Uuid, name: &str) -> Result<&mut Stage, ReporterError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| ReporterError::UnknownStage {
                job_id,
                name: name.to_string(),
            })?;
        Ok(&mut self.stages[idx])
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .stages
            .iter()
            .enumerate()
            .map(|(idx, stage)| (stage.name.clone(), idx))
            .collect();
    }
}

pub struct ProcessingReporter {
    jobs: Mutex<HashMap<Uuid, JobProgress>>,
    hub: StreamHub,
    status_store: Arc<dyn AssetStatusStore>,
}

impl ProcessingReporter {
    pub fn new(hub: StreamHub, status_store: Arc<dyn AssetStatusStore>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            hub,
            status_store,
        }
    }

    pub fn hub(&self) -> &StreamHub {
        &self.hub
    }

    /// Declare the job's full stage list, all pending. Errors on a second
    /// call for the same job and on duplicate stage names.
    pub async fn initialize_job(
        &self,
        job_id: Uuid,
        asset_id: Uuid,
        stage_names: Vec<String>,
    ) -> Result<(), ReporterError> {
        {
            let mut jobs = self.lock_jobs();
            if jobs.contains_key(&job_id) {
                return Err(ReporterError::AlreadyInitialized(job_id));
            }

            let mut progress = JobProgress {
                asset_id,
                stages: Vec::with_capacity(stage_names.len()),
                index: HashMap::new(),
                artifacts: Map::new(),
                extended: false,
                terminal: false,
            };
            for name in stage_names {
                if progress.index.contains_key(&name) {
                    return Err(ReporterError::DuplicateStage(name));
                }
                progress.index.insert(name.clone(), progress.stages.len());
                progress.stages.push(Stage::pending(name));
            }
            jobs.insert(job_id, progress);
        }

        let stages = self.stage_names(job_id);
        self.hub
            .publish(&asset_topic(asset_id), &StageEvent::JobInitialized { stages })
            .await;
        Ok(())
    }

    /// Transition a stage, optionally reporting progress.
    ///
    /// Progress is monotone within a stage: a regression is clamped to the
    /// previous high-water mark with a warning.
    pub async fn update_stage(
        &self,
        job_id: Uuid,
        name: &str,
        status: StageStatus,
        progress: Option<u8>,
    ) -> Result<(), ReporterError> {
        let (asset_id, stage) = {
            let mut jobs = self.lock_jobs();
            let job = jobs
                .get_mut(&job_id)
                .ok_or(ReporterError::UnknownJob(job_id))?;
            if job.terminal {
                return Err(ReporterError::TerminalJob(job_id));
            }
            let asset_id = job.asset_id;
            let stage = job.stage_mut(job_id, name)?;

            if stage.status.is_terminal()
                || (status == StageStatus::Pending && stage.status != StageStatus::Pending)
            {
                return Err(ReporterError::InvalidTransition {
                    name: name.to_string(),
                    from: stage.status,
                    to: status,
                });
            }

            if let Some(reported) = progress {
                let reported = reported.min(100);
                if reported < stage.progress {
                    warn!(
                        job_id = %job_id,
                        stage = name,
                        reported,
                        high_water = stage.progress,
                        "progress regression clamped"
                    );
                } else {
                    stage.progress = reported;
                }
            }
            stage.status = status;
            if status == StageStatus::Completed {
                stage.progress = 100;
            }
            (asset_id, stage.clone())
        };

        self.persist_and_publish(asset_id, &stage).await
    }

    /// Append new pending stages after the last stage that has started.
    /// Allowed exactly once per job, never after the job is terminal.
    pub async fn add_stages(
        &self,
        job_id: Uuid,
        names: Vec<String>,
    ) -> Result<(), ReporterError> {
        let (asset_id, added) = {
            let mut jobs = self.lock_jobs();
            let job = jobs
                .get_mut(&job_id)
                .ok_or(ReporterError::UnknownJob(job_id))?;
            if job.terminal {
                return Err(ReporterError::TerminalJob(job_id));
            }
            if job.extended {
                return Err(ReporterError::AlreadyExtended(job_id));
            }
            for name in &names {
                if job.index.contains_key(name) {
                    return Err(ReporterError::DuplicateStage(name.clone()));
                }
            }

            let insert_at = job
                .stages
                .iter()
                .rposition(|stage| stage.status != StageStatus::Pending)
                .map(|idx| idx + 1)
                .unwrap_or(job.stages.len());
            for (offset, name) in names.iter().enumerate() {
                job.stages
                    .insert(insert_at + offset, Stage::pending(name.clone()));
            }
            job.rebuild_index();
            job.extended = true;
            (job.asset_id, names)
        };

        self.hub
            .publish(
                &asset_topic(asset_id),
                &StageEvent::StagesAdded { stages: added },
            )
            .await;
        Ok(())
    }

    /// Finalize a stage successfully, merging its artifacts into the
    /// job's cumulative map.
    pub async fn complete_stage(
        &self,
        job_id: Uuid,
        name: &str,
        artifacts: Option<Map<String, Value>>,
    ) -> Result<(), ReporterError> {
        let (asset_id, stage) = {
            let mut jobs = self.lock_jobs();
            let job = jobs
                .get_mut(&job_id)
                .ok_or(ReporterError::UnknownJob(job_id))?;
            if job.terminal {
                return Err(ReporterError::TerminalJob(job_id));
            }
            let asset_id = job.asset_id;
            let stage = job.stage_mut(job_id, name)?;
            if stage.status.is_terminal() {
                return Err(ReporterError::InvalidTransition {
                    name: name.to_string(),
                    from: stage.status,
                    to: StageStatus::Completed,
                });
            }

            stage.status = StageStatus::Completed;
            stage.progress = 100;
            if let Some(artifacts) = artifacts {
                stage.artifacts.extend(artifacts.clone());
            }
            let stage = stage.clone();
            job.artifacts.extend(stage.artifacts.clone());
            (asset_id, stage)
        };

        self.persist_and_publish(asset_id, &stage).await
    }

    /// Finalize a stage as failed with a human-readable message.
    pub async fn fail_stage(
        &self,
        job_id: Uuid,
        name: &str,
        message: &str,
    ) -> Result<(), ReporterError> {
        let (asset_id, stage) = {
            let mut jobs = self.lock_jobs();
            let job = jobs
                .get_mut(&job_id)
                .ok_or(ReporterError::UnknownJob(job_id))?;
            let asset_id = job.asset_id;
            let stage = job.stage_mut(job_id, name)?;
            if stage.status.is_terminal() {
                return Err(ReporterError::InvalidTransition {
                    name: name.to_string(),
                    from: stage.status,
                    to: StageStatus::Failed,
                });
            }
            stage.status = StageStatus::Failed;
            stage.error = Some(message.to_string());
            (asset_id, stage.clone())
        };

        self.persist_and_publish(asset_id, &stage).await
    }

    /// Fail the stage currently processing (if any) with the error detail.
    pub async fn report_error(&self, job_id: Uuid, message: &str) -> Result<(), ReporterError> {
        match self.active_stage(job_id) {
            Some(name) => self.fail_stage(job_id, &name, message).await,
            None => Ok(()),
        }
    }

    /// Terminal success: publish the cumulative artifact map and mirror
    /// the outcome onto the asset.
    pub async fn complete_job(
        &self,
        job_id: Uuid,
        final_artifacts: Option<Map<String, Value>>,
    ) -> Result<(), ReporterError> {
        let (asset_id, artifacts) = {
            let mut jobs = self.lock_jobs();
            let job = jobs
                .get_mut(&job_id)
                .ok_or(ReporterError::UnknownJob(job_id))?;
            if job.terminal {
                return Err(ReporterError::TerminalJob(job_id));
            }
            job.terminal = true;
            if let Some(extra) = final_artifacts {
                job.artifacts.extend(extra);
            }
            (job.asset_id, job.artifacts.clone())
        };

        self.tolerate_gone(
            asset_id,
            self.status_store.record_outcome(asset_id, true, None).await?,
        );
        self.hub
            .publish(&asset_topic(asset_id), &StageEvent::JobCompleted { artifacts })
            .await;
        Ok(())
    }

    /// Terminal failure. `message` is user-facing; internal detail stays
    /// in the logs. Works even when the job never reached stage tracking
    /// (it failed before initialization).
    pub async fn fail_job(
        &self,
        job_id: Uuid,
        asset_id: Uuid,
        message: &str,
    ) -> Result<(), ReporterError> {
        {
            let mut jobs = self.lock_jobs();
            if let Some(job) = jobs.get_mut(&job_id) {
                if job.terminal {
                    return Err(ReporterError::TerminalJob(job_id));
                }
                job.terminal = true;
            }
        }

        self.tolerate_gone(
            asset_id,
            self.status_store
                .record_outcome(asset_id, false, Some(message))
                .await?,
        );
        self.hub
            .publish(
                &asset_topic(asset_id),
                &StageEvent::JobFailed {
                    message: message.to_string(),
                },
            )
            .await;
        Ok(())
    }

    /// Name of the stage currently in `processing`, if any.
    pub fn active_stage(&self, job_id: Uuid) -> Option<String> {
        let jobs = self.lock_jobs();
        jobs.get(&job_id)?
            .stages
            .iter()
            .find(|stage| stage.status == StageStatus::Processing)
            .map(|stage| stage.name.clone())
    }

    /// Ordered view of the job's stages.
    pub fn snapshot(&self, job_id: Uuid) -> Option<Vec<Stage>> {
        self.lock_jobs().get(&job_id).map(|job| job.stages.clone())
    }

    /// Drop tracking state once the worker is done with the job.
    pub fn forget(&self, job_id: Uuid) {
        self.lock_jobs().remove(&job_id);
    }

    fn stage_names(&self, job_id: Uuid) -> Vec<String> {
        self.lock_jobs()
            .get(&job_id)
            .map(|job| job.stages.iter().map(|stage| stage.name.clone()).collect())
            .unwrap_or_default()
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<Uuid, JobProgress>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tolerate_gone(&self, asset_id: Uuid, update: StatusUpdate) {
        if update == StatusUpdate::AssetGone {
            warn!(asset_id = %asset_id, "asset deleted mid-job, status write skipped");
        }
    }

    async fn persist_and_publish(&self, asset_id: Uuid, stage: &Stage) -> Result<(), ReporterError> {
        self.tolerate_gone(
            asset_id,
            self.status_store.record_stage(asset_id, stage).await?,
        );
        self.hub
            .publish(
                &asset_topic(asset_id),
                &StageEvent::StageChanged {
                    stage: stage.name.clone(),
                    status: stage.status,
                    progress: stage.progress,
                    artifacts: (!stage.artifacts.is_empty()).then(|| stage.artifacts.clone()),
                    error: stage.error.clone(),
                },
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::stages::status_store::MemoryAssetStatusStore;
    use serde_json::json;

    fn reporter_with_asset() -> (Arc<MemoryAssetStatusStore>, ProcessingReporter, Uuid) {
        let store = Arc::new(MemoryAssetStatusStore::new());
        let asset_id = Uuid::new_v4();
        store.insert_asset(asset_id);
        let reporter = ProcessingReporter::new(
            StreamHub::new(),
            Arc::clone(&store) as Arc<dyn AssetStatusStore>,
        );
        (store, reporter, asset_id)
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn initialize_twice_errors() {
        let (_, reporter, asset_id) = reporter_with_asset();
        let job_id = Uuid::new_v4();

        reporter
            .initialize_job(job_id, asset_id, names(&["classification"]))
            .await
            .unwrap();
        let err = reporter
            .initialize_job(job_id, asset_id, names(&["classification"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReporterError::AlreadyInitialized(_)));
    }

    #[tokio::test]
    async fn duplicate_stage_names_rejected() {
        let (_, reporter, asset_id) = reporter_with_asset();
        let err = reporter
            .initialize_job(Uuid::new_v4(), asset_id, names(&["a", "a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReporterError::DuplicateStage(_)));
    }

    #[tokio::test]
    async fn progress_clamps_to_high_water_mark() {
        let (_, reporter, asset_id) = reporter_with_asset();
        let job_id = Uuid::new_v4();
        reporter
            .initialize_job(job_id, asset_id, names(&["extract"]))
            .await
            .unwrap();

        for progress in [10, 50, 30] {
            reporter
                .update_stage(job_id, "extract", StageStatus::Processing, Some(progress))
                .await
                .unwrap();
        }

        let stages = reporter.snapshot(job_id).unwrap();
        assert_eq!(stages[0].progress, 50);
    }

    #[tokio::test]
    async fn terminal_stage_rejects_further_updates() {
        let (_, reporter, asset_id) = reporter_with_asset();
        let job_id = Uuid::new_v4();
        reporter
            .initialize_job(job_id, asset_id, names(&["extract"]))
            .await
            .unwrap();
        reporter
            .complete_stage(job_id, "extract", None)
            .await
            .unwrap();

        let err = reporter
            .update_stage(job_id, "extract", StageStatus::Processing, Some(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ReporterError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn add_stages_inserts_after_last_started_stage() {
        let (_, reporter, asset_id) = reporter_with_asset();
        let job_id = Uuid::new_v4();
        reporter
            .initialize_job(job_id, asset_id, names(&["classification", "finalization"]))
            .await
            .unwrap();
        reporter
            .complete_stage(job_id, "classification", None)
            .await
            .unwrap();

        reporter
            .add_stages(job_id, names(&["content-extraction", "document-analysis"]))
            .await
            .unwrap();

        let order: Vec<_> = reporter
            .snapshot(job_id)
            .unwrap()
            .into_iter()
            .map(|stage| stage.name)
            .collect();
        assert_eq!(
            order,
            vec![
                "classification",
                "content-extraction",
                "document-analysis",
                "finalization"
            ]
        );
    }

    #[tokio::test]
    async fn add_stages_is_single_use() {
        let (_, reporter, asset_id) = reporter_with_asset();
        let job_id = Uuid::new_v4();
        reporter
            .initialize_job(job_id, asset_id, names(&["classification"]))
            .await
            .unwrap();

        reporter.add_stages(job_id, names(&["extra"])).await.unwrap();
        let err = reporter
            .add_stages(job_id, names(&["more"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReporterError::AlreadyExtended(_)));
    }

    #[tokio::test]
    async fn add_stages_after_terminal_errors() {
        let (_, reporter, asset_id) = reporter_with_asset();
        let job_id = Uuid::new_v4();
        reporter
            .initialize_job(job_id, asset_id, names(&["classification"]))
            .await
            .unwrap();
        reporter.complete_job(job_id, None).await.unwrap();

        let err = reporter
            .add_stages(job_id, names(&["late"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReporterError::TerminalJob(_)));
    }

    #[tokio::test]
    async fn asset_deleted_mid_job_is_a_tolerated_noop() {
        let (store, reporter, asset_id) = reporter_with_asset();
        let job_id = Uuid::new_v4();
        reporter
            .initialize_job(job_id, asset_id, names(&["extract"]))
            .await
            .unwrap();

        store.remove_asset(asset_id);

        // Updates keep succeeding; persistence is skipped with a warning.
        reporter
            .update_stage(job_id, "extract", StageStatus::Processing, Some(20))
            .await
            .unwrap();
        reporter.complete_stage(job_id, "extract", None).await.unwrap();
        reporter.complete_job(job_id, None).await.unwrap();
    }

    #[tokio::test]
    async fn complete_job_publishes_cumulative_artifacts() {
        let (_, reporter, asset_id) = reporter_with_asset();
        let job_id = Uuid::new_v4();
        let mut rx = reporter.hub().subscribe(&asset_topic(asset_id)).await;

        reporter
            .initialize_job(job_id, asset_id, names(&["a", "b"]))
            .await
            .unwrap();
        let artifacts_a: Map<String, Value> =
            [("text".to_string(), json!("hello"))].into_iter().collect();
        let artifacts_b: Map<String, Value> =
            [("labels".to_string(), json!(["dog"]))].into_iter().collect();
        reporter
            .complete_stage(job_id, "a", Some(artifacts_a))
            .await
            .unwrap();
        reporter
            .complete_stage(job_id, "b", Some(artifacts_b))
            .await
            .unwrap();
        reporter.complete_job(job_id, None).await.unwrap();

        let mut terminal = None;
        while let Ok(event) = rx.try_recv() {
            if event["type"] == "job_completed" {
                terminal = Some(event);
            }
        }
        let event = terminal.unwrap();
        assert_eq!(event["artifacts"]["text"], json!("hello"));
        assert_eq!(event["artifacts"]["labels"], json!(["dog"]));
    }

    #[tokio::test]
    async fn report_error_fails_the_active_stage() {
        let (_, reporter, asset_id) = reporter_with_asset();
        let job_id = Uuid::new_v4();
        reporter
            .initialize_job(job_id, asset_id, names(&["extract", "analyze"]))
            .await
            .unwrap();
        reporter
            .update_stage(job_id, "extract", StageStatus::Processing, None)
            .await
            .unwrap();

        reporter.report_error(job_id, "upstream 503").await.unwrap();

        let stages = reporter.snapshot(job_id).unwrap();
        assert_eq!(stages[0].status, StageStatus::Failed);
        assert_eq!(stages[0].error.as_deref(), Some("upstream 503"));
        assert_eq!(stages[1].status, StageStatus::Pending);
    }
}
