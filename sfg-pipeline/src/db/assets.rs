//! Asset table operations
//!
//! Plain queries over the `assets` table. These return errors unchanged; the
//! boolean, never-raising surface lives in [`super::catalog::CatalogHandler`].

use crate::models::{Asset, AssetType, Scope};
use chrono::{DateTime, NaiveDateTime, Utc};
use sfg_common::config::CatalogContext;
use sfg_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const ASSET_COLUMNS: &str = "id, network, station, campaign, type, local_path, remote_path, \
     remote_type, parent_id, is_processed, timestamp_data_start, timestamp_data_end, \
     timestamp_created";

const INSERT_SQL: &str = r#"
    INSERT INTO assets (
        network, station, campaign, type, local_path, remote_path, remote_type,
        parent_id, is_processed, timestamp_data_start, timestamp_data_end, timestamp_created
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

// Update clause shared by both conflict targets. A known path, parent or data
// span is never cleared by an update that lacks it.
const UPSERT_UPDATE: &str = r#"
    DO UPDATE SET
        network = excluded.network,
        station = excluded.station,
        campaign = excluded.campaign,
        type = excluded.type,
        local_path = COALESCE(excluded.local_path, assets.local_path),
        remote_path = COALESCE(excluded.remote_path, assets.remote_path),
        remote_type = COALESCE(excluded.remote_type, assets.remote_type),
        parent_id = COALESCE(excluded.parent_id, assets.parent_id),
        is_processed = excluded.is_processed,
        timestamp_data_start = COALESCE(excluded.timestamp_data_start, assets.timestamp_data_start),
        timestamp_data_end = COALESCE(excluded.timestamp_data_end, assets.timestamp_data_end)
    RETURNING id
"#;

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

/// Parse either RFC 3339 or SQLite's `CURRENT_TIMESTAMP` format
fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    let value = value?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn asset_from_row(row: &SqliteRow) -> Result<Asset> {
    let type_str: String = row.get("type");
    let asset_type: AssetType = type_str.parse()?;
    let local_path: Option<String> = row.get("local_path");

    Ok(Asset {
        id: Some(row.get("id")),
        scope: Scope {
            network: row.get("network"),
            station: row.get("station"),
            campaign: row.get("campaign"),
        },
        asset_type,
        local_path: local_path.map(PathBuf::from),
        remote_path: row.get("remote_path"),
        remote_type: row.get("remote_type"),
        parent_id: row.get("parent_id"),
        is_processed: row.get::<i64, _>("is_processed") != 0,
        timestamp_data_start: parse_timestamp(row.get("timestamp_data_start")),
        timestamp_data_end: parse_timestamp(row.get("timestamp_data_end")),
        timestamp_created: parse_timestamp(row.get("timestamp_created")),
    })
}

fn bind_asset<'q>(
    query: sqlx::query::QueryScalar<'q, sqlx::Sqlite, i64, sqlx::sqlite::SqliteArguments<'q>>,
    asset: &'q Asset,
) -> sqlx::query::QueryScalar<'q, sqlx::Sqlite, i64, sqlx::sqlite::SqliteArguments<'q>> {
    let created = asset.timestamp_created.unwrap_or_else(Utc::now);
    query
        .bind(&asset.scope.network)
        .bind(&asset.scope.station)
        .bind(&asset.scope.campaign)
        .bind(asset.asset_type.as_str())
        .bind(asset.local_path.as_deref().map(path_to_string))
        .bind(asset.remote_path.as_deref())
        .bind(asset.remote_type.as_deref())
        .bind(asset.parent_id)
        .bind(asset.is_processed)
        .bind(format_timestamp(asset.timestamp_data_start))
        .bind(format_timestamp(asset.timestamp_data_end))
        .bind(created.to_rfc3339())
}

/// Insert a new asset, failing on any uniqueness conflict
///
/// Returns the assigned id.
pub async fn insert_asset(pool: &SqlitePool, asset: &Asset) -> Result<i64> {
    asset.validate()?;
    let sql = format!("{} RETURNING id", INSERT_SQL);
    let id = bind_asset(sqlx::query_scalar::<_, i64>(&sql), asset)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Insert, or update the row that already holds the same identity
///
/// **Conflict key:**
/// - `CatalogContext::Local`: (network, station, campaign, type, local_path)
/// - `CatalogContext::Archive`: remote_path
///
/// Returns the id of the inserted or updated row.
pub async fn upsert_asset(
    pool: &SqlitePool,
    asset: &Asset,
    context: CatalogContext,
) -> Result<i64> {
    asset.validate()?;

    let conflict_target = match context {
        CatalogContext::Local => {
            if asset.local_path.is_none() {
                return Err(Error::InvalidInput(format!(
                    "Local catalog upsert of {} {} requires local_path",
                    asset.scope, asset.asset_type
                )));
            }
            "ON CONFLICT(network, station, campaign, type, local_path)"
        }
        CatalogContext::Archive => {
            if asset.remote_path.is_none() {
                return Err(Error::InvalidInput(format!(
                    "Archive catalog upsert of {} {} requires remote_path",
                    asset.scope, asset.asset_type
                )));
            }
            "ON CONFLICT(remote_path)"
        }
    };

    let sql = format!("{} {} {}", INSERT_SQL, conflict_target, UPSERT_UPDATE);
    let id = bind_asset(sqlx::query_scalar::<_, i64>(&sql), asset)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Whether an asset with the same scope, type and local_path is catalogued
pub async fn equivalent_exists(pool: &SqlitePool, asset: &Asset) -> Result<bool> {
    let local_path = asset.local_path.as_deref().map(path_to_string);
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM assets
        WHERE network = ? AND station = ? AND campaign = ? AND type = ?
          AND local_path IS ?
        "#,
    )
    .bind(&asset.scope.network)
    .bind(&asset.scope.station)
    .bind(&asset.scope.campaign)
    .bind(asset.asset_type.as_str())
    .bind(local_path)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Load one asset by id
pub async fn get_asset(pool: &SqlitePool, id: i64) -> Result<Option<Asset>> {
    let sql = format!("SELECT {} FROM assets WHERE id = ?", ASSET_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(asset_from_row).transpose()
}

/// All assets of a type under a scope, ordered by id
///
/// With `local_only`, rows without a local_path are excluded.
pub async fn get_assets(
    pool: &SqlitePool,
    scope: &Scope,
    asset_type: AssetType,
    local_only: bool,
) -> Result<Vec<Asset>> {
    let local_clause = if local_only { "AND local_path IS NOT NULL" } else { "" };
    let sql = format!(
        r#"
        SELECT {} FROM assets
        WHERE network = ? AND station = ? AND campaign = ? AND type = ? {}
        ORDER BY id
        "#,
        ASSET_COLUMNS, local_clause
    );

    let rows = sqlx::query(&sql)
        .bind(&scope.network)
        .bind(&scope.station)
        .bind(&scope.campaign)
        .bind(asset_type.as_str())
        .fetch_all(pool)
        .await?;

    rows.iter().map(asset_from_row).collect()
}

/// Set `is_processed` on one asset
pub async fn set_processed(pool: &SqlitePool, id: i64, processed: bool) -> Result<u64> {
    let result = sqlx::query("UPDATE assets SET is_processed = ? WHERE id = ?")
        .bind(processed)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Record where an asset was materialized
pub async fn update_local_path(pool: &SqlitePool, id: i64, path: &Path) -> Result<u64> {
    let result = sqlx::query("UPDATE assets SET local_path = ? WHERE id = ?")
        .bind(path_to_string(path))
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Clear `is_processed` for every asset of the given kinds
pub async fn reset_processed_for_types(pool: &SqlitePool, types: &[AssetType]) -> Result<u64> {
    let mut total = 0;
    for asset_type in types {
        let result = sqlx::query("UPDATE assets SET is_processed = 0 WHERE type = ? AND is_processed = 1")
            .bind(asset_type.as_str())
            .execute(pool)
            .await?;
        total += result.rows_affected();
    }
    Ok(total)
}

/// Delete the assets of a type under a scope
///
/// `processed` narrows the deletion to rows with that `is_processed` value.
pub async fn delete_entries(
    pool: &SqlitePool,
    scope: &Scope,
    asset_type: AssetType,
    processed: Option<bool>,
) -> Result<u64> {
    let result = match processed {
        Some(flag) => {
            sqlx::query(
                r#"
                DELETE FROM assets
                WHERE network = ? AND station = ? AND campaign = ? AND type = ? AND is_processed = ?
                "#,
            )
            .bind(&scope.network)
            .bind(&scope.station)
            .bind(&scope.campaign)
            .bind(asset_type.as_str())
            .bind(flag)
            .execute(pool)
            .await?
        }
        None => {
            sqlx::query(
                "DELETE FROM assets WHERE network = ? AND station = ? AND campaign = ? AND type = ?",
            )
            .bind(&scope.network)
            .bind(&scope.station)
            .bind(&scope.campaign)
            .bind(asset_type.as_str())
            .execute(pool)
            .await?
        }
    };
    Ok(result.rows_affected())
}

/// Delete one asset by id
pub async fn delete_entry(pool: &SqlitePool, id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM assets WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Count local assets per type under a scope
pub async fn dtype_counts(pool: &SqlitePool, scope: &Scope) -> Result<BTreeMap<AssetType, i64>> {
    let rows = sqlx::query(
        r#"
        SELECT type, COUNT(*) AS count FROM assets
        WHERE network = ? AND station = ? AND campaign = ? AND local_path IS NOT NULL
        GROUP BY type
        "#,
    )
    .bind(&scope.network)
    .bind(&scope.station)
    .bind(&scope.campaign)
    .fetch_all(pool)
    .await?;

    let mut counts = BTreeMap::new();
    for row in rows {
        let type_str: String = row.get("type");
        counts.insert(type_str.parse()?, row.get("count"));
    }
    Ok(counts)
}

/// Escape LIKE wildcards so `value` matches literally under `ESCAPE '\'`
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Whether a file with exactly this name is already materialized for (scope, type)
///
/// Matches the final path component only; `_` and `%` in names are literal.
pub async fn local_file_named(
    pool: &SqlitePool,
    scope: &Scope,
    asset_type: AssetType,
    file_name: &str,
) -> Result<bool> {
    let pattern = format!("%/{}", escape_like(file_name));
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM assets
        WHERE network = ? AND station = ? AND campaign = ? AND type = ?
          AND (local_path = ? OR local_path LIKE ? ESCAPE '\')
        "#,
    )
    .bind(&scope.network)
    .bind(&scope.station)
    .bind(&scope.campaign)
    .bind(asset_type.as_str())
    .bind(file_name)
    .bind(pattern)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Distinct scopes present in the catalog, optionally narrowed to one network
pub async fn distinct_scopes(pool: &SqlitePool, network: Option<&str>) -> Result<Vec<Scope>> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT network, station, campaign FROM assets
        WHERE (? IS NULL OR network = ?)
        ORDER BY network, station, campaign
        "#,
    )
    .bind(network)
    .bind(network)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Scope {
            network: row.get("network"),
            station: row.get("station"),
            campaign: row.get("campaign"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfg_common::db::create_catalog_tables;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_catalog_tables(&pool).await.unwrap();
        pool
    }

    fn scope() -> Scope {
        Scope::new("net1", "st1", "camp1")
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let pool = setup_test_db().await;
        let asset = Asset::local(scope(), AssetType::Rinex, "/data/NCC12440.23o");

        let id = insert_asset(&pool, &asset).await.unwrap();
        let loaded = get_asset(&pool, id).await.unwrap().unwrap();

        assert_eq!(loaded.id, Some(id));
        assert_eq!(loaded.asset_type, AssetType::Rinex);
        assert_eq!(loaded.local_path, asset.local_path);
        assert!(!loaded.is_processed);
        assert!(loaded.timestamp_created.is_some());
    }

    #[tokio::test]
    async fn test_insert_duplicate_is_unique_violation() {
        let pool = setup_test_db().await;
        let asset = Asset::local(scope(), AssetType::Kin, "/data/a.kin");

        insert_asset(&pool, &asset).await.unwrap();
        let err = insert_asset(&pool, &asset).await.unwrap_err();
        assert!(err.is_unique_violation(), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_upsert_local_updates_in_place() {
        let pool = setup_test_db().await;
        let mut asset = Asset::local(scope(), AssetType::Kin, "/data/a.kin");

        let first = upsert_asset(&pool, &asset, CatalogContext::Local).await.unwrap();
        asset.is_processed = true;
        asset.parent_id = None;
        let second = upsert_asset(&pool, &asset, CatalogContext::Local).await.unwrap();

        assert_eq!(first, second);
        let all = get_assets(&pool, &scope(), AssetType::Kin, false).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_processed);
    }

    #[tokio::test]
    async fn test_upsert_archive_keeps_known_local_path() {
        let pool = setup_test_db().await;
        let mut asset = Asset::remote(scope(), AssetType::Novatel770, "s3://bucket/NOV770.raw");
        asset.local_path = Some(PathBuf::from("/data/NOV770.raw"));
        let id = upsert_asset(&pool, &asset, CatalogContext::Archive).await.unwrap();

        // Re-registering from the archive listing carries no local path
        let relisted = Asset::remote(scope(), AssetType::Novatel770, "s3://bucket/NOV770.raw");
        let again = upsert_asset(&pool, &relisted, CatalogContext::Archive).await.unwrap();

        assert_eq!(id, again);
        let loaded = get_asset(&pool, id).await.unwrap().unwrap();
        assert_eq!(loaded.local_path, Some(PathBuf::from("/data/NOV770.raw")));
    }

    #[tokio::test]
    async fn test_local_only_filter() {
        let pool = setup_test_db().await;
        insert_asset(&pool, &Asset::local(scope(), AssetType::Dfop00, "/data/a_DFOP00.raw"))
            .await
            .unwrap();
        insert_asset(&pool, &Asset::remote(scope(), AssetType::Dfop00, "s3://b_DFOP00.raw"))
            .await
            .unwrap();

        assert_eq!(get_assets(&pool, &scope(), AssetType::Dfop00, false).await.unwrap().len(), 2);
        assert_eq!(get_assets(&pool, &scope(), AssetType::Dfop00, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dtype_counts_and_delete() {
        let pool = setup_test_db().await;
        for name in ["a.kin", "b.kin"] {
            insert_asset(&pool, &Asset::local(scope(), AssetType::Kin, format!("/d/{}", name)))
                .await
                .unwrap();
        }
        let rinex = insert_asset(&pool, &Asset::local(scope(), AssetType::Rinex, "/d/a.23o"))
            .await
            .unwrap();

        let counts = dtype_counts(&pool, &scope()).await.unwrap();
        assert_eq!(counts.get(&AssetType::Kin), Some(&2));
        assert_eq!(counts.get(&AssetType::Rinex), Some(&1));

        assert_eq!(delete_entries(&pool, &scope(), AssetType::Kin, Some(true)).await.unwrap(), 0);
        assert_eq!(delete_entries(&pool, &scope(), AssetType::Kin, None).await.unwrap(), 2);
        assert_eq!(delete_entry(&pool, rinex).await.unwrap(), 1);
        assert!(dtype_counts(&pool, &scope()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_file_named_matches_suffix() {
        let pool = setup_test_db().await;
        insert_asset(&pool, &Asset::local(scope(), AssetType::Ctd, "/data/raw/site_CTD.txt"))
            .await
            .unwrap();

        assert!(local_file_named(&pool, &scope(), AssetType::Ctd, "site_CTD.txt").await.unwrap());
        assert!(!local_file_named(&pool, &scope(), AssetType::Ctd, "other.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_file_named_is_exact() {
        let pool = setup_test_db().await;
        insert_asset(&pool, &Asset::local(scope(), AssetType::Ctd, "/data/othersite_CTD.txt"))
            .await
            .unwrap();
        insert_asset(&pool, &Asset::local(scope(), AssetType::Dfop00, "/data/aXDFOP00.raw"))
            .await
            .unwrap();

        // Longer names and `_` wildcards must not match
        assert!(!local_file_named(&pool, &scope(), AssetType::Ctd, "site_CTD.txt").await.unwrap());
        assert!(!local_file_named(&pool, &scope(), AssetType::Dfop00, "a_DFOP00.raw").await.unwrap());
        assert!(local_file_named(&pool, &scope(), AssetType::Ctd, "othersite_CTD.txt").await.unwrap());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("a_b%c\\d"), "a\\_b\\%c\\\\d");
        assert_eq!(escape_like("plain.txt"), "plain.txt");
    }

    #[tokio::test]
    async fn test_distinct_scopes() {
        let pool = setup_test_db().await;
        let other = Scope::new("net2", "st9", "camp1");
        insert_asset(&pool, &Asset::local(scope(), AssetType::Kin, "/d/a.kin")).await.unwrap();
        insert_asset(&pool, &Asset::local(other.clone(), AssetType::Kin, "/d/b.kin"))
            .await
            .unwrap();

        assert_eq!(distinct_scopes(&pool, None).await.unwrap(), vec![scope(), other]);
        assert_eq!(distinct_scopes(&pool, Some("net1")).await.unwrap(), vec![scope()]);
    }
}
