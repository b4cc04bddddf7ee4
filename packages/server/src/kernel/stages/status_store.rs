//! Asset status persistence behind a trait.
//!
//! Progress mirrors onto the asset record so the owning domain can show
//! status without touching job internals. The store distinguishes "asset
//! deleted mid-job" (a tolerated outcome) from real lookup or auth errors,
//! which propagate.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use super::stage::{Stage, StageStatus};

/// Outcome of a status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Applied,
    /// The asset record no longer exists. Callers warn and carry on;
    /// this is not an error.
    AssetGone,
}

#[async_trait]
pub trait AssetStatusStore: Send + Sync {
    /// Mirror one stage's state onto the asset record.
    async fn record_stage(&self, asset_id: Uuid, stage: &Stage) -> Result<StatusUpdate>;

    /// Mirror the job's terminal outcome onto the asset record.
    async fn record_outcome(
        &self,
        asset_id: Uuid,
        success: bool,
        message: Option<&str>,
    ) -> Result<StatusUpdate>;
}

#[derive(Debug, Default, Clone)]
pub struct AssetRecord {
    pub stages: HashMap<String, (StageStatus, u8)>,
    pub outcome: Option<(bool, Option<String>)>,
}

/// In-memory asset table for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryAssetStatusStore {
    assets: Mutex<HashMap<Uuid, AssetRecord>>,
}

impl MemoryAssetStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset so status writes land somewhere.
    pub fn insert_asset(&self, asset_id: Uuid) {
        self.lock_assets().insert(asset_id, AssetRecord::default());
    }

    /// Delete the asset, simulating removal mid-job.
    pub fn remove_asset(&self, asset_id: Uuid) {
        self.lock_assets().remove(&asset_id);
    }

    pub fn record(&self, asset_id: Uuid) -> Option<AssetRecord> {
        self.lock_assets().get(&asset_id).cloned()
    }

    fn lock_assets(&self) -> MutexGuard<'_, HashMap<Uuid, AssetRecord>> {
        self.assets.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AssetStatusStore for MemoryAssetStatusStore {
    async fn record_stage(&self, asset_id: Uuid, stage: &Stage) -> Result<StatusUpdate> {
        let mut assets = self.lock_assets();
        let Some(record) = assets.get_mut(&asset_id) else {
            return Ok(StatusUpdate::AssetGone);
        };
        record
            .stages
            .insert(stage.name.clone(), (stage.status, stage.progress));
        Ok(StatusUpdate::Applied)
    }

    async fn record_outcome(
        &self,
        asset_id: Uuid,
        success: bool,
        message: Option<&str>,
    ) -> Result<StatusUpdate> {
        let mut assets = self.lock_assets();
        let Some(record) = assets.get_mut(&asset_id) else {
            return Ok(StatusUpdate::AssetGone);
        };
        record.outcome = Some((success, message.map(str::to_string)));
        Ok(StatusUpdate::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_asset_reports_gone_not_error() {
        let store = MemoryAssetStatusStore::new();
        let stage = Stage::pending("classification");

        let update = store.record_stage(Uuid::new_v4(), &stage).await.unwrap();
        assert_eq!(update, StatusUpdate::AssetGone);
    }

    #[tokio::test]
    async fn stage_and_outcome_writes_land_on_the_record() {
        let store = MemoryAssetStatusStore::new();
        let asset_id = Uuid::new_v4();
        store.insert_asset(asset_id);

        let mut stage = Stage::pending("classification");
        stage.status = StageStatus::Processing;
        stage.progress = 30;
        assert_eq!(
            store.record_stage(asset_id, &stage).await.unwrap(),
            StatusUpdate::Applied
        );
        assert_eq!(
            store.record_outcome(asset_id, true, None).await.unwrap(),
            StatusUpdate::Applied
        );

        let record = store.record(asset_id).unwrap();
        assert_eq!(
            record.stages["classification"],
            (StageStatus::Processing, 30)
        );
        assert_eq!(record.outcome, Some((true, None)));
    }
}
