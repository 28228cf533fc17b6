//! Time-series store
//!
//! Append-only storage of schema-validated rows keyed by scope, time and entity.
//! Writing a row whose key already exists replaces it, which is how refined
//! shot positions supersede the preliminary ones.

use super::schema::{ImuPosition, KinPosition, SeriesBatch, SeriesRow, ShotRecord};
use crate::models::Scope;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sfg_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

/// Half-open time interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(Error::InvalidInput(format!(
                "Time range end {} is not after start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Range starting at `start`; a missing end defaults to one day later
    pub fn starting_at(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<Self> {
        Self::new(start, end.unwrap_or(start + Duration::days(1)))
    }

    /// The whole UTC calendar day
    pub fn day(date: NaiveDate) -> Self {
        let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

/// Store contract for one row schema
#[async_trait]
pub trait TimeSeriesStore<R: SeriesRow>: Send + Sync {
    /// Validate and append rows; returns how many were written
    async fn write(&self, scope: &Scope, rows: &[R]) -> Result<usize>;

    /// Rows whose indexed time falls in the half-open range, in time order
    async fn read(&self, scope: &Scope, range: &TimeRange) -> Result<Vec<R>>;

    /// Distinct UTC calendar days present in a time column
    async fn unique_dates(&self, scope: &Scope, column: &str) -> Result<BTreeSet<NaiveDate>>;
}

/// SQLite-backed store, one table per schema
pub struct SqliteSeriesStore<R> {
    pool: SqlitePool,
    _row: PhantomData<fn() -> R>,
}

impl<R: SeriesRow> SqliteSeriesStore<R> {
    /// Create the backing table if needed
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                network TEXT NOT NULL,
                station TEXT NOT NULL,
                campaign TEXT NOT NULL,
                time_us INTEGER NOT NULL,
                entity TEXT NOT NULL DEFAULT '',
                payload TEXT NOT NULL,
                PRIMARY KEY (network, station, campaign, time_us, entity)
            )
            "#,
            R::TABLE
        );
        sqlx::query(&sql).execute(&pool).await?;

        Ok(Self {
            pool,
            _row: PhantomData,
        })
    }
}

#[async_trait]
impl<R: SeriesRow> TimeSeriesStore<R> for SqliteSeriesStore<R> {
    async fn write(&self, scope: &Scope, rows: &[R]) -> Result<usize> {
        for (index, row) in rows.iter().enumerate() {
            row.validate().map_err(|reason| {
                Error::InvalidInput(format!("{} row {}: {}", R::TABLE, index, reason))
            })?;
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            r#"
            INSERT INTO {} (network, station, campaign, time_us, entity, payload)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(network, station, campaign, time_us, entity)
            DO UPDATE SET payload = excluded.payload
            "#,
            R::TABLE
        );

        let mut tx = self.pool.begin().await?;
        for row in rows {
            let payload = serde_json::to_string(row)
                .map_err(|e| Error::Internal(format!("Failed to encode {} row: {}", R::TABLE, e)))?;
            sqlx::query(&sql)
                .bind(&scope.network)
                .bind(&scope.station)
                .bind(&scope.campaign)
                .bind(row.time().timestamp_micros())
                .bind(row.entity_key())
                .bind(payload)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(table = R::TABLE, scope = %scope, rows = rows.len(), "Wrote series rows");
        Ok(rows.len())
    }

    async fn read(&self, scope: &Scope, range: &TimeRange) -> Result<Vec<R>> {
        let sql = format!(
            r#"
            SELECT payload FROM {}
            WHERE network = ? AND station = ? AND campaign = ?
              AND time_us >= ? AND time_us < ?
            ORDER BY time_us, entity
            "#,
            R::TABLE
        );

        let rows = sqlx::query(&sql)
            .bind(&scope.network)
            .bind(&scope.station)
            .bind(&scope.campaign)
            .bind(range.start.timestamp_micros())
            .bind(range.end.timestamp_micros())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.get("payload");
                serde_json::from_str(&payload).map_err(|e| {
                    Error::Internal(format!("Corrupt {} payload: {}", R::TABLE, e))
                })
            })
            .collect()
    }

    async fn unique_dates(&self, scope: &Scope, column: &str) -> Result<BTreeSet<NaiveDate>> {
        if !R::TIME_COLUMNS.contains(&column) {
            return Err(Error::InvalidInput(format!(
                "{} has no time column '{}' (expected one of {:?})",
                R::TABLE,
                column,
                R::TIME_COLUMNS
            )));
        }

        // The indexed axis is answered from the key; other columns need the payload
        if R::TIME_COLUMNS.first() == Some(&column) {
            let sql = format!(
                r#"
                SELECT DISTINCT date(time_us / 1000000, 'unixepoch') AS day FROM {}
                WHERE network = ? AND station = ? AND campaign = ?
                "#,
                R::TABLE
            );
            let days: Vec<String> = sqlx::query_scalar(&sql)
                .bind(&scope.network)
                .bind(&scope.station)
                .bind(&scope.campaign)
                .fetch_all(&self.pool)
                .await?;

            return days
                .iter()
                .map(|day| {
                    NaiveDate::parse_from_str(day, "%Y-%m-%d")
                        .map_err(|e| Error::Internal(format!("Bad stored day '{}': {}", day, e)))
                })
                .collect();
        }

        let sql = format!(
            "SELECT payload FROM {} WHERE network = ? AND station = ? AND campaign = ?",
            R::TABLE
        );
        let payloads: Vec<String> = sqlx::query_scalar(&sql)
            .bind(&scope.network)
            .bind(&scope.station)
            .bind(&scope.campaign)
            .fetch_all(&self.pool)
            .await?;

        let mut dates = BTreeSet::new();
        for payload in payloads {
            let row: R = serde_json::from_str(&payload)
                .map_err(|e| Error::Internal(format!("Corrupt {} payload: {}", R::TABLE, e)))?;
            if let Some(t) = row.time_column(column) {
                dates.insert(t.date_naive());
            }
        }
        Ok(dates)
    }
}

/// One store per schema, with typed dispatch for bulk-stage output
#[derive(Clone)]
pub struct SeriesStores {
    pub kin_positions: Arc<dyn TimeSeriesStore<KinPosition>>,
    pub imu_positions: Arc<dyn TimeSeriesStore<ImuPosition>>,
    pub shots: Arc<dyn TimeSeriesStore<ShotRecord>>,
}

impl SeriesStores {
    /// SQLite stores sharing one pool
    pub async fn sqlite(pool: SqlitePool) -> Result<Self> {
        Ok(Self {
            kin_positions: Arc::new(SqliteSeriesStore::<KinPosition>::new(pool.clone()).await?),
            imu_positions: Arc::new(SqliteSeriesStore::<ImuPosition>::new(pool.clone()).await?),
            shots: Arc::new(SqliteSeriesStore::<ShotRecord>::new(pool).await?),
        })
    }

    /// Route a batch to the store for its schema
    pub async fn write_batch(&self, scope: &Scope, batch: &SeriesBatch) -> Result<usize> {
        match batch {
            SeriesBatch::KinPositions(rows) => self.kin_positions.write(scope, rows).await,
            SeriesBatch::ImuPositions(rows) => self.imu_positions.write(scope, rows).await,
            SeriesBatch::Shots(rows) => self.shots.write(scope, rows).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scope() -> Scope {
        Scope::new("net1", "st1", "camp1")
    }

    fn kin_at(t: DateTime<Utc>) -> KinPosition {
        KinPosition {
            time: t,
            x: -2_575_288.1,
            y: -3_682_570.2,
            z: 4_511_064.3,
            latitude: 45.3,
            longitude: 235.03,
            height: -32.1,
            num_sats: 14,
            pdop: 1.3,
        }
    }

    fn shot_at(id: &str, ping: DateTime<Utc>, ret: DateTime<Utc>) -> ShotRecord {
        ShotRecord {
            transponder_id: id.to_string(),
            ping_time: ping,
            return_time: ret,
            travel_time: (ret - ping).num_milliseconds() as f64 / 1000.0,
            east0: 1.0,
            north0: 2.0,
            up0: 3.0,
            east1: 1.5,
            north1: 2.5,
            up1: 3.5,
            is_updated: false,
        }
    }

    async fn setup_stores() -> SeriesStores {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SeriesStores::sqlite(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_read_is_half_open() {
        let stores = setup_stores().await;
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let rows: Vec<KinPosition> = (0..4).map(|h| kin_at(start + Duration::hours(h))).collect();
        stores.kin_positions.write(&scope(), &rows).await.unwrap();

        let range = TimeRange::new(start + Duration::hours(1), start + Duration::hours(3)).unwrap();
        let read = stores.kin_positions.read(&scope(), &range).await.unwrap();

        assert_eq!(read.len(), 2);
        assert_eq!(read[0].time, start + Duration::hours(1));
        assert_eq!(read[1].time, start + Duration::hours(2));
    }

    #[test]
    fn test_default_range_is_one_day() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let range = TimeRange::starting_at(start, None).unwrap();
        assert!(range.contains(start + Duration::hours(23)));
        assert!(!range.contains(start + Duration::days(1)));
        assert!(TimeRange::new(start, start).is_err());
    }

    #[tokio::test]
    async fn test_invalid_rows_rejected_before_write() {
        let stores = setup_stores().await;
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut bad = kin_at(t + Duration::seconds(1));
        bad.latitude = 123.0;

        let result = stores.kin_positions.write(&scope(), &[kin_at(t), bad]).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let all = stores.kin_positions.read(&scope(), &TimeRange::day(t.date_naive())).await.unwrap();
        assert!(all.is_empty(), "no row of a rejected batch may be stored");
    }

    #[tokio::test]
    async fn test_rewrite_replaces_same_key() {
        let stores = setup_stores().await;
        let ping = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let ret = ping + Duration::seconds(4);
        let original = shot_at("5209", ping, ret);
        let other_transponder = shot_at("5210", ping, ret);
        stores
            .shots
            .write(&scope(), &[original.clone(), other_transponder])
            .await
            .unwrap();

        let mut refined = original.clone();
        refined.east0 = 10.0;
        refined.is_updated = true;
        stores.shots.write(&scope(), &[refined.clone()]).await.unwrap();

        let all = stores.shots.read(&scope(), &TimeRange::day(ping.date_naive())).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], refined);
    }

    #[tokio::test]
    async fn test_unique_dates_by_column() {
        let stores = setup_stores().await;
        // Ping just before midnight, reply just after
        let ping = Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 58).unwrap();
        let ret = ping + Duration::seconds(4);
        stores.shots.write(&scope(), &[shot_at("5209", ping, ret)]).await.unwrap();

        let ping_days = stores.shots.unique_dates(&scope(), "ping_time").await.unwrap();
        let return_days = stores.shots.unique_dates(&scope(), "return_time").await.unwrap();

        assert_eq!(ping_days.into_iter().collect::<Vec<_>>(), vec![ping.date_naive()]);
        assert_eq!(return_days.into_iter().collect::<Vec<_>>(), vec![ret.date_naive()]);
        assert!(stores.shots.unique_dates(&scope(), "time").await.is_err());
    }

    #[tokio::test]
    async fn test_write_batch_dispatches_by_schema() {
        let stores = setup_stores().await;
        let t = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();
        let written = stores
            .write_batch(&scope(), &SeriesBatch::KinPositions(vec![kin_at(t)]))
            .await
            .unwrap();

        assert_eq!(written, 1);
        let dates = stores.kin_positions.unique_dates(&scope(), "time").await.unwrap();
        assert!(dates.contains(&t.date_naive()));
        assert!(stores.shots.unique_dates(&scope(), "ping_time").await.unwrap().is_empty());
    }
}
