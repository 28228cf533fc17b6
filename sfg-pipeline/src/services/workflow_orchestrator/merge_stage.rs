//! N-to-1 stages: one invocation over every parent, keyed for idempotency

use super::statistics::StageStats;
use super::{run_blocking, PipelineOrchestrator};
use crate::error::{PipelineError, PipelineResult, ToolError};
use crate::fusion::refine_shot_positions;
use crate::models::{Asset, AssetType, MergeKey, Scope};
use crate::services::stages::{StageContext, StageDescriptor};
use crate::timeseries::TimeRange;
use chrono::Duration;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

/// Margin read around each day so shots near midnight still find neighbors
const FUSION_READ_MARGIN_S: i64 = 60;

/// Short, filesystem-safe directory name for a merge key
fn key_dir(key: &MergeKey) -> String {
    let digest = Sha256::digest(key.as_str().as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

impl PipelineOrchestrator {
    pub(super) async fn run_merge_stage(
        &self,
        scope: &Scope,
        stage: &'static StageDescriptor,
        override_existing: bool,
    ) -> PipelineResult<StageStats> {
        let child_type = stage.completion_child().ok_or_else(|| {
            PipelineError::Configuration(format!("{} declares no product type", stage.name))
        })?;
        let parent_type = stage.parents[0];

        let mut inputs: Vec<Asset> = Vec::new();
        for parent_type in stage.parents {
            inputs.extend(self.catalog.get_local_assets(scope, *parent_type).await);
        }
        if inputs.is_empty() {
            return Err(PipelineError::NothingToDo {
                stage: stage.name,
                scope: scope.clone(),
                asset_type: parent_type,
            });
        }

        let ids: Vec<i64> = inputs.iter().filter_map(|a| a.id).collect();
        let key = MergeKey::from_ids(&ids);
        if !override_existing && self.catalog.is_merge_complete(parent_type, child_type, &key).await
        {
            debug!(stage = stage.name, scope = %scope, parent_ids = %key, "Merge already complete");
            return Ok(StageStats::skipped());
        }

        let function = self.stage_function(stage)?;
        let ctx = StageContext {
            scope: scope.clone(),
            output_dir: self.prepare_output_dir(scope, stage.name, &key_dir(&key))?,
        };
        info!(
            stage = stage.name,
            scope = %scope,
            inputs = inputs.len(),
            parent_ids = %key,
            "Merge starting"
        );

        let output = run_blocking(function, inputs.clone(), ctx)
            .await
            .map_err(|source| PipelineError::MergeFailed {
                stage: stage.name,
                scope: scope.clone(),
                source,
            })?;

        let product_count = output.assets.len();
        if !self
            .record_products(scope, stage, output.assets, output.rows.as_ref())
            .await
        {
            return Err(PipelineError::MergeFailed {
                stage: stage.name,
                scope: scope.clone(),
                source: ToolError::NoOutput("products could not be recorded".to_string()),
            });
        }

        self.record_merge_job(scope, stage, parent_type, child_type, &key)
            .await?;
        for id in ids {
            if !self.catalog.mark_processed(id).await {
                error!(
                    stage = stage.name,
                    network = %scope.network,
                    station = %scope.station,
                    campaign = %scope.campaign,
                    asset_id = id,
                    "Merge input could not be marked processed"
                );
            }
        }

        info!(stage = stage.name, scope = %scope, products = product_count, "Merge complete");
        Ok(StageStats {
            attempted: 1,
            succeeded: 1,
            ..StageStats::default()
        })
    }

    /// Shot refinement, keyed by the days both kinematic positions and shots cover
    pub(super) async fn run_fusion_stage(
        &self,
        scope: &Scope,
        stage: &'static StageDescriptor,
        override_existing: bool,
    ) -> PipelineResult<StageStats> {
        let kin_dates = self.stores.kin_positions.unique_dates(scope, "time").await?;
        let shot_dates = self.stores.shots.unique_dates(scope, "ping_time").await?;
        let common: BTreeSet<_> = kin_dates.intersection(&shot_dates).copied().collect();

        if common.is_empty() {
            return Err(PipelineError::NothingToDo {
                stage: stage.name,
                scope: scope.clone(),
                asset_type: AssetType::KinPosition,
            });
        }

        let key = MergeKey::from_labels(common.iter().map(|d| d.format("%Y-%m-%d").to_string()));
        if !override_existing
            && self
                .catalog
                .is_merge_complete(AssetType::KinPosition, AssetType::ShotData, &key)
                .await
        {
            debug!(stage = stage.name, scope = %scope, dates = %key, "Shots already refined");
            return Ok(StageStats::skipped());
        }

        let mut stats = StageStats::default();
        let margin = Duration::seconds(FUSION_READ_MARGIN_S);

        for date in &common {
            stats.attempted += 1;
            let day = TimeRange::day(*date);
            let padded = TimeRange::new(day.start - margin, day.end + margin)?;

            let shots = self.stores.shots.read(scope, &day).await?;
            let imu = self.stores.imu_positions.read(scope, &padded).await?;
            let kin = self.stores.kin_positions.read(scope, &padded).await?;

            let config = self.config.fusion.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                refine_shot_positions(&shots, &imu, &kin, &config)
            })
            .await
            .map_err(|e| PipelineError::MergeFailed {
                stage: stage.name,
                scope: scope.clone(),
                source: ToolError::Worker(e.to_string()),
            })?
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;

            if outcome.unresolved > 0 {
                warn!(
                    stage = stage.name,
                    scope = %scope,
                    date = %date,
                    unresolved = outcome.unresolved,
                    "Some shot instants kept their original positions"
                );
            }
            if outcome.updated > 0 {
                self.stores.shots.write(scope, &outcome.shots).await?;
            }
            info!(
                stage = stage.name,
                scope = %scope,
                date = %date,
                shots = outcome.shots.len(),
                updated = outcome.updated,
                "Day refined"
            );
            stats.record(true);
        }

        self.record_merge_job(scope, stage, AssetType::KinPosition, AssetType::ShotData, &key)
            .await?;
        Ok(stats)
    }

    /// Record a finished merge; without it the next run would repeat the work
    async fn record_merge_job(
        &self,
        scope: &Scope,
        stage: &'static StageDescriptor,
        parent_type: AssetType,
        child_type: AssetType,
        key: &MergeKey,
    ) -> PipelineResult<()> {
        if self.catalog.add_merge_job(parent_type, child_type, key).await {
            return Ok(());
        }
        error!(
            stage = stage.name,
            network = %scope.network,
            station = %scope.station,
            campaign = %scope.campaign,
            parent_type = %parent_type,
            parent_ids = %key,
            "Merge job could not be recorded"
        );
        Err(PipelineError::Bookkeeping {
            stage: stage.name,
            scope: scope.clone(),
            message: format!("merge job {} could not be recorded", key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_dir_is_stable_and_short() {
        let a = key_dir(&MergeKey::from_ids(&[7, 3]));
        let b = key_dir(&MergeKey::from_ids(&[3, 7]));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, key_dir(&MergeKey::from_ids(&[3, 8])));
    }
}
