//! Integration tests for catalog database initialization

use sfg_common::db::init::{create_catalog_tables, get_meta, init_database, set_meta};
use sqlx::SqlitePool;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("catalog.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("catalog.db");

    let pool1 = init_database(&db_path).await;
    assert!(pool1.is_ok());

    // Second open runs every CREATE ... IF NOT EXISTS again
    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_catalog_tables_created() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    create_catalog_tables(&pool).await.unwrap();

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(tables, vec!["assets", "catalog_meta", "merge_jobs"]);
}

#[tokio::test]
async fn test_assets_require_a_path() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    create_catalog_tables(&pool).await.unwrap();

    let result = sqlx::query(
        "INSERT INTO assets (network, station, campaign, type) VALUES ('net1', 'st1', 'camp1', 'kin')",
    )
    .execute(&pool)
    .await;

    assert!(result.is_err(), "Row without local_path or remote_path must be rejected");
}

#[tokio::test]
async fn test_meta_roundtrip_overwrites() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    create_catalog_tables(&pool).await.unwrap();

    assert_eq!(get_meta(&pool, "graph_fingerprint").await.unwrap(), None);

    set_meta(&pool, "graph_fingerprint", "abc").await.unwrap();
    set_meta(&pool, "graph_fingerprint", "def").await.unwrap();

    assert_eq!(
        get_meta(&pool, "graph_fingerprint").await.unwrap(),
        Some("def".to_string())
    );
}
