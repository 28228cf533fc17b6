//! Time-series storage for kinematic positions and acoustic shots

pub mod schema;
pub mod store;

pub use schema::{ImuPosition, KinPosition, SeriesBatch, SeriesRow, ShotRecord};
pub use store::{SeriesStores, SqliteSeriesStore, TimeRange, TimeSeriesStore};
