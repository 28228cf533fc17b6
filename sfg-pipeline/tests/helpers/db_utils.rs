//! Database Test Utilities

use anyhow::Result;
use sfg_common::config::CatalogContext;
use sfg_pipeline::config::PipelineConfig;
use sfg_pipeline::db::CatalogHandler;
use sfg_pipeline::models::DirectoryLayout;
use sfg_pipeline::open_orchestrator;
use sfg_pipeline::services::PipelineOrchestrator;
use sqlx::SqlitePool;
use std::path::Path;
use tempfile::TempDir;

/// Column information from PRAGMA table_info
#[derive(Debug, sqlx::FromRow)]
pub struct ColumnInfo {
    pub cid: i32,
    pub name: String,
    pub r#type: String,
    pub notnull: i32,
    pub dflt_value: Option<String>,
    pub pk: i32,
}

/// Catalog in a fresh temporary directory
///
/// Returns (TempDir, CatalogHandler) - TempDir must be kept alive for duration of test
pub async fn create_test_catalog(context: CatalogContext) -> Result<(TempDir, CatalogHandler)> {
    let temp_dir = TempDir::new()?;
    let catalog = CatalogHandler::open(&temp_dir.path().join("catalog.db"), context).await?;
    Ok((temp_dir, catalog))
}

/// Orchestrator rooted in a fresh temporary directory
pub async fn create_test_orchestrator(
    config: PipelineConfig,
) -> Result<(TempDir, PipelineOrchestrator)> {
    let temp_dir = TempDir::new()?;
    let orchestrator = open_test_orchestrator(temp_dir.path(), config).await?;
    Ok((temp_dir, orchestrator))
}

/// Orchestrator whose data root is `<dir>/root`
pub async fn open_test_orchestrator(
    dir: &Path,
    config: PipelineConfig,
) -> Result<PipelineOrchestrator> {
    let orchestrator = open_orchestrator(
        DirectoryLayout::new(dir.join("root")),
        CatalogContext::Local,
        config,
    )
    .await?;
    Ok(orchestrator)
}

pub async fn get_table_columns(pool: &SqlitePool, table_name: &str) -> Result<Vec<ColumnInfo>> {
    let query = format!("PRAGMA table_info({})", table_name);
    let columns = sqlx::query_as::<_, ColumnInfo>(&query)
        .fetch_all(pool)
        .await?;
    Ok(columns)
}

pub async fn has_column(pool: &SqlitePool, table_name: &str, column_name: &str) -> Result<bool> {
    let columns = get_table_columns(pool, table_name).await?;
    Ok(columns.iter().any(|c| c.name == column_name))
}
