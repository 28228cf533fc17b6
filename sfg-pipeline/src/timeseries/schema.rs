//! Row schemas held in the time-series store

use crate::models::SeriesKind;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A row type the time-series store can hold
pub trait SeriesRow: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Backing table name
    const TABLE: &'static str;
    /// Names accepted by `unique_dates`; the first is the indexed time axis
    const TIME_COLUMNS: &'static [&'static str];
    const KIND: SeriesKind;

    /// Value of the indexed time axis
    fn time(&self) -> DateTime<Utc>;

    /// Value of any named time column
    fn time_column(&self, column: &str) -> Option<DateTime<Utc>>;

    /// Distinguishes rows sharing a timestamp (empty when time alone is unique)
    fn entity_key(&self) -> String {
        String::new()
    }

    /// Schema check applied before any row is written
    fn validate(&self) -> Result<(), String>;
}

fn check_finite(values: &[(&str, f64)]) -> Result<(), String> {
    for (name, value) in values {
        if !value.is_finite() {
            return Err(format!("{} is not finite ({})", name, value));
        }
    }
    Ok(())
}

fn check_non_negative(values: &[(&str, f64)]) -> Result<(), String> {
    for (name, value) in values {
        if value.is_nan() || *value < 0.0 {
            return Err(format!("{} must be non-negative ({})", name, value));
        }
    }
    Ok(())
}

fn check_latitude(latitude: f64) -> Result<(), String> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(format!("latitude out of range ({})", latitude));
    }
    Ok(())
}

/// Precise-point-positioning solution epoch (no velocity)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KinPosition {
    pub time: DateTime<Utc>,
    /// Earth-centered, earth-fixed coordinates in metres
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub latitude: f64,
    /// Degrees east, 0..360 as written by the solver
    pub longitude: f64,
    pub height: f64,
    pub num_sats: u32,
    pub pdop: f64,
}

impl SeriesRow for KinPosition {
    const TABLE: &'static str = "ts_kin_position";
    const TIME_COLUMNS: &'static [&'static str] = &["time"];
    const KIND: SeriesKind = SeriesKind::KinPosition;

    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn time_column(&self, column: &str) -> Option<DateTime<Utc>> {
        (column == "time").then_some(self.time)
    }

    fn validate(&self) -> Result<(), String> {
        check_finite(&[
            ("x", self.x),
            ("y", self.y),
            ("z", self.z),
            ("longitude", self.longitude),
            ("height", self.height),
        ])?;
        check_latitude(self.latitude)?;
        check_non_negative(&[("pdop", self.pdop)])
    }
}

/// Inertially aided position with velocity, in geodetic coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImuPosition {
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub height: f64,
    pub east_velocity: f64,
    pub north_velocity: f64,
    pub up_velocity: f64,
    /// Sigmas are missing on epochs where the receiver did not report them
    #[serde(default)]
    pub latitude_std: Option<f64>,
    #[serde(default)]
    pub longitude_std: Option<f64>,
    #[serde(default)]
    pub height_std: Option<f64>,
    #[serde(default)]
    pub east_velocity_std: Option<f64>,
    #[serde(default)]
    pub north_velocity_std: Option<f64>,
    #[serde(default)]
    pub up_velocity_std: Option<f64>,
}

impl SeriesRow for ImuPosition {
    const TABLE: &'static str = "ts_imu_position";
    const TIME_COLUMNS: &'static [&'static str] = &["time"];
    const KIND: SeriesKind = SeriesKind::ImuPosition;

    fn time(&self) -> DateTime<Utc> {
        self.time
    }

    fn time_column(&self, column: &str) -> Option<DateTime<Utc>> {
        (column == "time").then_some(self.time)
    }

    fn validate(&self) -> Result<(), String> {
        check_finite(&[
            ("longitude", self.longitude),
            ("height", self.height),
            ("east_velocity", self.east_velocity),
            ("north_velocity", self.north_velocity),
            ("up_velocity", self.up_velocity),
        ])?;
        check_latitude(self.latitude)?;
        let sigmas: Vec<(&str, f64)> = [
            ("latitude_std", self.latitude_std),
            ("longitude_std", self.longitude_std),
            ("height_std", self.height_std),
            ("east_velocity_std", self.east_velocity_std),
            ("north_velocity_std", self.north_velocity_std),
            ("up_velocity_std", self.up_velocity_std),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect();
        check_non_negative(&sigmas)
    }
}

/// One acoustic interrogation: ping sent, reply received
///
/// Positions are earth-centered coordinates of the transducer at send (`*0`)
/// and receive (`*1`) time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotRecord {
    pub transponder_id: String,
    pub ping_time: DateTime<Utc>,
    pub return_time: DateTime<Utc>,
    /// Two-way travel time in seconds
    pub travel_time: f64,
    pub east0: f64,
    pub north0: f64,
    pub up0: f64,
    pub east1: f64,
    pub north1: f64,
    pub up1: f64,
    #[serde(default)]
    pub is_updated: bool,
}

impl SeriesRow for ShotRecord {
    const TABLE: &'static str = "ts_shot_data";
    const TIME_COLUMNS: &'static [&'static str] = &["ping_time", "return_time"];
    const KIND: SeriesKind = SeriesKind::ShotData;

    fn time(&self) -> DateTime<Utc> {
        self.ping_time
    }

    fn time_column(&self, column: &str) -> Option<DateTime<Utc>> {
        match column {
            "ping_time" => Some(self.ping_time),
            "return_time" => Some(self.return_time),
            _ => None,
        }
    }

    fn entity_key(&self) -> String {
        self.transponder_id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        if self.transponder_id.is_empty() {
            return Err("transponder_id is empty".to_string());
        }
        if self.return_time < self.ping_time {
            return Err(format!(
                "return_time {} precedes ping_time {}",
                self.return_time, self.ping_time
            ));
        }
        check_finite(&[
            ("east0", self.east0),
            ("north0", self.north0),
            ("up0", self.up0),
            ("east1", self.east1),
            ("north1", self.north1),
            ("up1", self.up1),
        ])?;
        check_non_negative(&[("travel_time", self.travel_time)])
    }
}

/// Rows produced by a bulk stage, tagged with their schema
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesBatch {
    KinPositions(Vec<KinPosition>),
    ImuPositions(Vec<ImuPosition>),
    Shots(Vec<ShotRecord>),
}

impl SeriesBatch {
    /// An empty batch of the given schema
    pub fn empty(kind: SeriesKind) -> Self {
        match kind {
            SeriesKind::KinPosition => SeriesBatch::KinPositions(Vec::new()),
            SeriesKind::ImuPosition => SeriesBatch::ImuPositions(Vec::new()),
            SeriesKind::ShotData => SeriesBatch::Shots(Vec::new()),
        }
    }

    pub fn kind(&self) -> SeriesKind {
        match self {
            SeriesBatch::KinPositions(_) => SeriesKind::KinPosition,
            SeriesBatch::ImuPositions(_) => SeriesKind::ImuPosition,
            SeriesBatch::Shots(_) => SeriesKind::ShotData,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SeriesBatch::KinPositions(rows) => rows.len(),
            SeriesBatch::ImuPositions(rows) => rows.len(),
            SeriesBatch::Shots(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse newline-delimited JSON rows of the given schema
    pub fn from_ndjson(kind: SeriesKind, text: &str) -> Result<Self, String> {
        fn parse_lines<R: SeriesRow>(text: &str) -> Result<Vec<R>, String> {
            text.lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(n, line)| {
                    serde_json::from_str::<R>(line).map_err(|e| format!("line {}: {}", n + 1, e))
                })
                .collect()
        }

        Ok(match kind {
            SeriesKind::KinPosition => SeriesBatch::KinPositions(parse_lines(text)?),
            SeriesKind::ImuPosition => SeriesBatch::ImuPositions(parse_lines(text)?),
            SeriesKind::ShotData => SeriesBatch::Shots(parse_lines(text)?),
        })
    }
}
