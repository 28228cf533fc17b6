//! Merge-job table operations

use crate::models::{AssetType, MergeJob, MergeKey};
use sfg_common::Result;
use sqlx::{Row, SqlitePool};

/// Whether the fusion described by `job` has already completed
pub async fn merge_job_exists(pool: &SqlitePool, job: &MergeJob) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM merge_jobs
        WHERE parent_type = ? AND child_type = ? AND parent_ids = ?
        "#,
    )
    .bind(job.parent_type.as_str())
    .bind(job.child_type.as_str())
    .bind(job.parent_ids.as_str())
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Record a completed fusion
///
/// Recording the same key twice is a no-op. Returns whether a new row was written.
pub async fn insert_merge_job(pool: &SqlitePool, job: &MergeJob) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO merge_jobs (parent_type, child_type, parent_ids)
        VALUES (?, ?, ?)
        ON CONFLICT(parent_type, child_type, parent_ids) DO NOTHING
        "#,
    )
    .bind(job.parent_type.as_str())
    .bind(job.child_type.as_str())
    .bind(job.parent_ids.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// All recorded merges for a (parent_type, child_type) pair
pub async fn list_merge_jobs(
    pool: &SqlitePool,
    parent_type: AssetType,
    child_type: AssetType,
) -> Result<Vec<MergeJob>> {
    let rows = sqlx::query(
        r#"
        SELECT parent_ids FROM merge_jobs
        WHERE parent_type = ? AND child_type = ?
        ORDER BY id
        "#,
    )
    .bind(parent_type.as_str())
    .bind(child_type.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            MergeJob::new(
                parent_type,
                child_type,
                MergeKey::from_stored(row.get::<String, _>("parent_ids")),
            )
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

    #[tokio::test]
    async fn test_insert_then_exists() {
        let pool = setup_test_db().await;
        let job = MergeJob::new(
            AssetType::Novatel770,
            AssetType::GnssObsTdb,
            MergeKey::from_ids(&[4, 2]),
        );

        assert!(!merge_job_exists(&pool, &job).await.unwrap());
        assert!(insert_merge_job(&pool, &job).await.unwrap());
        assert!(merge_job_exists(&pool, &job).await.unwrap());

        // Second insert of the same key writes nothing
        assert!(!insert_merge_job(&pool, &job).await.unwrap());
        let jobs = list_merge_jobs(&pool, AssetType::Novatel770, AssetType::GnssObsTdb)
            .await
            .unwrap();
        assert_eq!(jobs, vec![job]);
    }

    #[tokio::test]
    async fn test_types_are_part_of_identity() {
        let pool = setup_test_db().await;
        let key = MergeKey::from_ids(&[1, 2]);
        insert_merge_job(
            &pool,
            &MergeJob::new(AssetType::Novatel770, AssetType::GnssObsTdb, key.clone()),
        )
        .await
        .unwrap();

        let other = MergeJob::new(AssetType::Novatel000, AssetType::GnssObsTdb, key);
        assert!(!merge_job_exists(&pool, &other).await.unwrap());
    }
}
