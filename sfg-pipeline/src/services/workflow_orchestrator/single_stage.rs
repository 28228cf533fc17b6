//! One-to-one stages: one invocation per parent, on a bounded worker pool

use super::statistics::StageStats;
use super::{run_blocking, PipelineOrchestrator};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Asset, Scope};
use crate::services::stages::{StageContext, StageDescriptor};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info};

impl PipelineOrchestrator {
    pub(super) async fn run_single_stage(
        &self,
        scope: &Scope,
        stage: &'static StageDescriptor,
        override_existing: bool,
    ) -> PipelineResult<StageStats> {
        let mut work: Vec<Asset> = Vec::new();
        for parent_type in stage.parents {
            work.extend(
                self.catalog
                    .get_single_entries_to_process(
                        scope,
                        *parent_type,
                        stage.completion_child(),
                        override_existing,
                    )
                    .await,
            );
        }

        if work.is_empty() {
            return Err(PipelineError::NothingToDo {
                stage: stage.name,
                scope: scope.clone(),
                asset_type: stage.parents[0],
            });
        }

        // Resolve the program only once there is work for it
        let function = self.stage_function(stage)?;

        let mut stats = StageStats {
            attempted: work.len(),
            ..StageStats::default()
        };
        info!(
            stage = stage.name,
            scope = %scope,
            units = work.len(),
            workers = self.config.n_workers,
            override_existing,
            "Stage starting"
        );

        let mut units = Vec::with_capacity(work.len());
        for parent in work {
            let unit = match parent.id {
                Some(id) => id.to_string(),
                None => parent.file_name().unwrap_or_else(|| "unit".to_string()),
            };
            let output_dir = self.prepare_output_dir(scope, stage.name, &unit)?;
            units.push((parent, output_dir));
        }

        let mut results = stream::iter(units)
            .map(|(parent, output_dir)| {
                let function = function.clone();
                let ctx = StageContext {
                    scope: scope.clone(),
                    output_dir,
                };
                async move {
                    let result = run_blocking(function, vec![parent.clone()], ctx).await;
                    (parent, result)
                }
            })
            .buffer_unordered(self.config.n_workers.max(1));

        while let Some((parent, result)) = results.next().await {
            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    error!(
                        stage = stage.name,
                        network = %scope.network,
                        station = %scope.station,
                        campaign = %scope.campaign,
                        asset_type = %parent.asset_type,
                        asset_id = ?parent.id,
                        file = ?parent.local_path,
                        error = %e,
                        "Stage unit failed"
                    );
                    stats.record(false);
                    continue;
                }
            };

            let products: Vec<Asset> = output
                .assets
                .into_iter()
                .map(|child| child.with_parent(parent.id))
                .collect();
            let product_count = products.len();

            let mut ok = self
                .record_products(scope, stage, products, output.rows.as_ref())
                .await;
            if ok {
                ok = match parent.id {
                    Some(id) => self.catalog.mark_processed(id).await,
                    None => false,
                };
            }

            if ok {
                debug!(
                    stage = stage.name,
                    asset_id = ?parent.id,
                    products = product_count,
                    "Stage unit complete"
                );
            } else {
                error!(
                    stage = stage.name,
                    network = %scope.network,
                    station = %scope.station,
                    campaign = %scope.campaign,
                    asset_type = %parent.asset_type,
                    asset_id = ?parent.id,
                    "Stage unit products could not be recorded"
                );
            }
            stats.record(ok);
        }

        info!(stage = stage.name, scope = %scope, "{}", stats.display_string());
        Ok(stats)
    }
}
