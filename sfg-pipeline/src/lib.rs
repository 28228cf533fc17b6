//! sfg-pipeline library interface
//!
//! Catalog, time-series store, shot refinement and the stage orchestrator for
//! seafloor-geodesy campaign processing. The `sfg-pipeline` binary is a thin
//! CLI over these modules.

pub mod config;
pub mod db;
pub mod error;
pub mod fusion;
pub mod models;
pub mod services;
pub mod timeseries;
pub mod utils;

pub use crate::error::{PipelineError, PipelineResult, ToolError};

use crate::config::PipelineConfig;
use crate::db::CatalogHandler;
use crate::models::DirectoryLayout;
use crate::services::PipelineOrchestrator;
use crate::timeseries::SeriesStores;
use sfg_common::config::CatalogContext;
use std::sync::Arc;

/// Open the catalog and series store under a root folder and build an orchestrator
pub async fn open_orchestrator(
    layout: DirectoryLayout,
    context: CatalogContext,
    config: PipelineConfig,
) -> sfg_common::Result<PipelineOrchestrator> {
    std::fs::create_dir_all(layout.root())?;
    let catalog = CatalogHandler::open(&layout.catalog_db(), context).await?;
    let series_pool = sfg_common::db::open_database(&layout.timeseries_db()).await?;
    let stores = SeriesStores::sqlite(series_pool).await?;
    Ok(PipelineOrchestrator::new(
        Arc::new(catalog),
        stores,
        config,
        layout,
    ))
}
