//! Pipeline orchestrator
//!
//! Walks the static stage table for one (network, station, campaign) scope,
//! asks the catalog what still needs doing, runs stage functions and records
//! their products.
//!
//! # Stage shapes
//! - **Single** (`single_stage`): one invocation per parent on a bounded worker
//!   pool. A failing unit is logged and skipped.
//! - **Merge** (`merge_stage`): one invocation over every parent, guarded by a
//!   merge-job key. Failure aborts the run.
//!
//! Catalog and series-store writes only happen on the orchestrator task.

mod merge_stage;
mod single_stage;
pub mod statistics;

pub use statistics::{ProcessingStatistics, StageStats};

use crate::config::PipelineConfig;
use crate::db::{CatalogHandler, Registration};
use crate::error::{PipelineError, PipelineResult, ToolError};
use crate::models::{Asset, DirectoryLayout, Scope};
use crate::services::file_scanner::{FileScanner, ScanResult};
use crate::services::stages::{
    find_stage, Driver, ExternalTool, KinFileParser, StageContext, StageDescriptor,
    StageFunction, StageKind, StageOutput, STAGES,
};
use crate::timeseries::{SeriesBatch, SeriesStores};
use sfg_common::LogContext;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct PipelineOrchestrator {
    catalog: Arc<CatalogHandler>,
    stores: SeriesStores,
    config: PipelineConfig,
    layout: DirectoryLayout,
    log: Option<LogContext>,
}

impl PipelineOrchestrator {
    pub fn new(
        catalog: Arc<CatalogHandler>,
        stores: SeriesStores,
        config: PipelineConfig,
        layout: DirectoryLayout,
    ) -> Self {
        Self {
            catalog,
            stores,
            config,
            layout,
            log: None,
        }
    }

    /// Route run logs into each campaign's `logs/` directory
    pub fn with_log_context(mut self, log: LogContext) -> Self {
        self.log = Some(log);
        self
    }

    pub fn catalog(&self) -> &CatalogHandler {
        &self.catalog
    }

    pub fn stores(&self) -> &SeriesStores {
        &self.stores
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Classify the files under `dir` and register them for `scope`
    pub async fn ingest_directory(&self, dir: &Path, scope: &Scope) -> PipelineResult<ScanResult> {
        let root = dir.to_path_buf();
        let scan_scope = scope.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            FileScanner::new().scan_scope(&root, &scan_scope)
        })
        .await
        .map_err(|e| PipelineError::Configuration(format!("Scan worker failed: {}", e)))?
        .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        let mut registered = 0;
        for asset in &scanned.assets {
            if self.catalog.add_or_update(asset).await {
                registered += 1;
            }
        }

        info!(
            network = %scope.network,
            station = %scope.station,
            campaign = %scope.campaign,
            found = scanned.assets.len(),
            registered,
            "Ingested directory {}",
            dir.display()
        );
        Ok(scanned)
    }

    /// Run every stage in order for one scope
    ///
    /// Stages with nothing to do are logged and passed over. Merge failures and
    /// configuration errors stop the run.
    pub async fn run_pipeline(&self, scope: &Scope) -> PipelineResult<ProcessingStatistics> {
        self.config.validate()?;
        self.ensure_local_data(scope).await?;
        self.route_logs(scope);

        info!(scope = %scope, "Pipeline run starting");
        let mut statistics = ProcessingStatistics::new();
        let mut outcome = Ok(());

        for stage in STAGES.iter() {
            match self.execute_stage(scope, stage).await {
                Ok(stats) => statistics.insert(stage.name, stats),
                Err(e) if e.is_nothing_to_do() => {
                    info!(stage = stage.name, scope = %scope, "{}", e);
                    statistics.insert(stage.name, StageStats::skipped());
                }
                Err(e) => {
                    error!(
                        stage = stage.name,
                        network = %scope.network,
                        station = %scope.station,
                        campaign = %scope.campaign,
                        error = %e,
                        "Pipeline run aborted"
                    );
                    outcome = Err(e);
                    break;
                }
            }
        }

        for line in statistics.display_lines() {
            info!(scope = %scope, "{}", line);
        }
        self.restore_logs();
        outcome.map(|_| statistics)
    }

    /// Run a single named stage
    ///
    /// With `strict`, "nothing to do" is returned as an error; otherwise it is
    /// logged and reported as a skipped stage.
    pub async fn run_stage(
        &self,
        scope: &Scope,
        stage_name: &str,
        strict: bool,
    ) -> PipelineResult<StageStats> {
        let stage =
            find_stage(stage_name).ok_or_else(|| PipelineError::UnknownStage(stage_name.to_string()))?;
        self.config.validate()?;
        self.ensure_local_data(scope).await?;
        self.route_logs(scope);

        let result = match self.execute_stage(scope, stage).await {
            Err(e) if e.is_nothing_to_do() && !strict => {
                warn!(stage = stage.name, scope = %scope, "{}", e);
                Ok(StageStats::skipped())
            }
            other => other,
        };
        if let Ok(stats) = &result {
            info!(stage = stage.name, scope = %scope, "{}", stats.display_string());
        }

        self.restore_logs();
        result
    }

    async fn ensure_local_data(&self, scope: &Scope) -> PipelineResult<()> {
        if self.catalog.get_dtype_counts(scope).await.is_empty() {
            return Err(PipelineError::NoLocalData(scope.clone()));
        }
        Ok(())
    }

    async fn execute_stage(
        &self,
        scope: &Scope,
        stage: &'static StageDescriptor,
    ) -> PipelineResult<StageStats> {
        let override_existing = self.config.overrides(stage.name);
        match (stage.kind, stage.driver) {
            (StageKind::Merge, Driver::Fusion) => {
                self.run_fusion_stage(scope, stage, override_existing).await
            }
            (StageKind::Merge, _) => self.run_merge_stage(scope, stage, override_existing).await,
            (StageKind::Single, _) => self.run_single_stage(scope, stage, override_existing).await,
        }
    }

    /// Build the stage function, resolving its program when it needs one
    fn stage_function(&self, stage: &StageDescriptor) -> PipelineResult<Arc<dyn StageFunction>> {
        match stage.driver {
            Driver::Tool(slot) => {
                let program = self.config.tools.resolve(slot)?;
                Ok(Arc::new(ExternalTool::new(
                    stage.name,
                    program,
                    self.config.tools.args_for(stage.name),
                    stage.children,
                    stage.rows,
                )))
            }
            Driver::KinParser => Ok(Arc::new(KinFileParser)),
            Driver::Fusion => Err(PipelineError::Configuration(format!(
                "{} has no file-level stage function",
                stage.name
            ))),
        }
    }

    /// Fresh, empty output directory for one invocation
    fn prepare_output_dir(&self, scope: &Scope, stage: &str, unit: &str) -> PipelineResult<PathBuf> {
        let dir = self.layout.intermediate_dir(scope).join(stage).join(unit);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Record one unit's products; false if any catalog or store write failed
    async fn record_products(
        &self,
        scope: &Scope,
        stage: &StageDescriptor,
        products: Vec<Asset>,
        rows: Option<&SeriesBatch>,
    ) -> bool {
        let mut ok = true;
        for asset in products {
            // Insert-only stages accept an existing product, never a store failure
            let recorded = if stage.insert_only {
                self.catalog.register_entry(&asset).await != Registration::Failed
            } else {
                self.catalog.add_or_update(&asset).await
            };
            if !recorded {
                ok = false;
            }
        }

        if let Some(batch) = rows {
            match self.stores.write_batch(scope, batch).await {
                Ok(written) => info!(stage = stage.name, scope = %scope, rows = written, "Rows stored"),
                Err(e) => {
                    error!(
                        stage = stage.name,
                        network = %scope.network,
                        station = %scope.station,
                        campaign = %scope.campaign,
                        error = %e,
                        "Failed to store rows"
                    );
                    ok = false;
                }
            }
        }
        ok
    }

    fn route_logs(&self, scope: &Scope) {
        if let Some(log) = &self.log {
            let dir = self.layout.logs_dir(scope);
            match log.redirect_to_dir(&dir) {
                Ok(path) => info!(log_file = %path.display(), "Logging to campaign directory"),
                Err(e) => warn!(dir = %dir.display(), error = %e, "Could not redirect logs"),
            }
        }
    }

    fn restore_logs(&self) {
        if let Some(log) = &self.log {
            log.route_to_console();
        }
    }
}

/// Run a blocking stage function on the blocking pool
async fn run_blocking(
    function: Arc<dyn StageFunction>,
    inputs: Vec<Asset>,
    ctx: StageContext,
) -> Result<StageOutput, ToolError> {
    match tokio::task::spawn_blocking(move || function.run(&inputs, &ctx)).await {
        Ok(result) => result,
        Err(e) => Err(ToolError::Worker(e.to_string())),
    }
}
