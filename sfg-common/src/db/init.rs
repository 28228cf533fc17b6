//! Database initialization
//!
//! Opens (or creates) the SQLite catalog and makes sure the asset, merge-job and
//! metadata tables exist. Every `create_*` function is idempotent.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Busy timeout applied to every catalog connection
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize the catalog database: open it and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let pool = open_database(db_path).await?;
    create_catalog_tables(&pool).await?;
    Ok(pool)
}

/// Open (creating if missing) a SQLite file with the workspace PRAGMAs applied
///
/// The time-series store uses this directly; it owns its own tables.
pub async fn open_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Writes are serialized on the orchestrator task; status queries read alongside
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    let pragma_sql = format!("PRAGMA busy_timeout = {}", DEFAULT_BUSY_TIMEOUT_MS);
    sqlx::query(&pragma_sql)
        .execute(&pool)
        .await?;

    Ok(pool)
}

/// Create every catalog table on an already-open pool
///
/// Used directly by tests running against `sqlite::memory:`.
pub async fn create_catalog_tables(pool: &SqlitePool) -> Result<()> {
    create_assets_table(pool).await?;
    create_merge_jobs_table(pool).await?;
    create_catalog_meta_table(pool).await?;
    Ok(())
}

/// Create the assets table
///
/// One row per physical file or derived artifact. A row must carry at least one
/// of `local_path` / `remote_path`; `remote_path` is globally unique and
/// `local_path` is unique within (scope, type).
pub async fn create_assets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            network TEXT NOT NULL,
            station TEXT NOT NULL,
            campaign TEXT NOT NULL,
            type TEXT NOT NULL,
            local_path TEXT,
            remote_path TEXT UNIQUE,
            remote_type TEXT,
            parent_id INTEGER REFERENCES assets(id) ON DELETE SET NULL,
            is_processed INTEGER NOT NULL DEFAULT 0,
            timestamp_data_start TIMESTAMP,
            timestamp_data_end TIMESTAMP,
            timestamp_created TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (local_path IS NOT NULL OR remote_path IS NOT NULL),
            UNIQUE (network, station, campaign, type, local_path),
            UNIQUE (network, station, campaign, type, remote_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_assets_scope_type ON assets(network, station, campaign, type)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_assets_parent ON assets(parent_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the merge_jobs table
///
/// `parent_ids` holds the canonical (sorted, joined) key of the merged inputs.
pub async fn create_merge_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merge_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_type TEXT NOT NULL,
            child_type TEXT NOT NULL,
            parent_ids TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (parent_type, child_type, parent_ids)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the catalog_meta key/value table
pub async fn create_catalog_meta_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Read a catalog metadata value
pub async fn get_meta(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM catalog_meta WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

/// Insert or replace a catalog metadata value
pub async fn set_meta(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO catalog_meta (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}
