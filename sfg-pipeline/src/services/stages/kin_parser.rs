//! In-process reader for PPP kinematic solution (`kin`) files
//!
//! Data starts two lines after `END OF HEADER`. Each row is
//! `MJD SOD [*] X Y Z LAT LON HGT [NSAT ...] PDOP`; per-constellation satellite
//! counts vary in number, so only the first nine fields and the last are used.

use super::{StageContext, StageFunction, StageOutput};
use crate::error::ToolError;
use crate::models::Asset;
use crate::timeseries::{KinPosition, SeriesBatch, SeriesRow};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{info, warn};

const HEADER_END: &str = "END OF HEADER";
/// MJD of the Unix epoch
const MJD_UNIX_EPOCH: f64 = 40_587.0;

#[derive(Debug, Clone, Default)]
pub struct KinFileParser;

fn epoch_from_mjd(mjd: f64, second_of_day: f64) -> Option<DateTime<Utc>> {
    let seconds = (mjd - MJD_UNIX_EPOCH) * 86_400.0 + second_of_day;
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((seconds * 1e6).round() as i64)
}

/// Parse one data row
pub fn parse_kin_line(line: &str) -> Result<KinPosition, String> {
    let tokens: Vec<&str> = line.split_whitespace().filter(|t| *t != "*").collect();
    let last = tokens.len().saturating_sub(1);
    let fields: Vec<&str> = match tokens.len() {
        n if n >= 10 => tokens[..9].iter().copied().chain([tokens[last]]).collect(),
        // satellite count absent
        9 => tokens[..8].iter().copied().chain(["1", tokens[last]]).collect(),
        n => return Err(format!("expected at least 9 fields, found {}", n)),
    };

    let num = |i: usize| -> Result<f64, String> {
        fields[i]
            .parse::<f64>()
            .map_err(|e| format!("field {} '{}': {}", i + 1, fields[i], e))
    };

    let time = epoch_from_mjd(num(0)?, num(1)?).ok_or("epoch out of range")?;
    let num_sats = fields[8]
        .parse::<u32>()
        .map_err(|e| format!("satellite count '{}': {}", fields[8], e))?;

    let row = KinPosition {
        time,
        x: num(2)?,
        y: num(3)?,
        z: num(4)?,
        latitude: num(5)?,
        longitude: num(6)?,
        height: num(7)?,
        num_sats,
        pdop: num(9)?,
    };
    row.validate()?;
    Ok(row)
}

/// Parse a whole file; bad rows are logged and skipped
pub fn parse_kin_file(path: &Path) -> Result<Vec<KinPosition>, ToolError> {
    let content = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = content.lines().collect();

    let header_end = lines
        .iter()
        .position(|line| line.trim() == HEADER_END)
        .ok_or_else(|| ToolError::parse(path, "no END OF HEADER line"))?;

    let mut rows = Vec::new();
    for (idx, line) in lines.iter().enumerate().skip(header_end + 2) {
        if line.trim().is_empty() {
            continue;
        }
        match parse_kin_line(line) {
            Ok(row) => rows.push(row),
            Err(e) => warn!(path = %path.display(), line = idx + 1, error = %e, "Skipping kin row"),
        }
    }

    if rows.is_empty() {
        return Err(ToolError::NoOutput(format!("no positions in {}", path.display())));
    }
    info!(path = %path.display(), rows = rows.len(), "Parsed kin file");
    Ok(rows)
}

impl StageFunction for KinFileParser {
    fn name(&self) -> &str {
        "ingest_kin"
    }

    fn run(&self, inputs: &[Asset], _ctx: &StageContext) -> Result<StageOutput, ToolError> {
        let mut rows = Vec::new();
        for asset in inputs {
            let path = asset.local_path.as_deref().ok_or_else(|| {
                ToolError::InvalidInput(format!("kin asset {:?} has no local file", asset.id))
            })?;
            rows.extend(parse_kin_file(path)?);
        }
        Ok(StageOutput {
            assets: Vec::new(),
            rows: Some(SeriesBatch::KinPositions(rows)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
PRIDE PPPAR kinematic solution                              COMMENT
                                                            END OF HEADER
  MJD      SOD       X             Y             Z           Lat          Lon        Height  Nsat  G  R  E  C  J  PDOP
60462  0.000  -2575288.1234 -3682570.4321  4511064.5678   45.3012345  235.0412345  -32.1234  12  8  0  4  0  0  1.23
60462  1.000 * -2575288.2234 -3682570.5321  4511064.6678   45.3012346  235.0412346  -32.1334  11  7  0  4  0  0  1.30
garbage line
60462  2.000  -2575288.3234 -3682570.6321  4511064.7678   45.3012347  235.0412347  -32.1434  1.40
";

    #[test]
    fn test_parse_sample_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kin_2024153_st1");
        std::fs::write(&path, SAMPLE).unwrap();

        let rows = parse_kin_file(&path).unwrap();
        assert_eq!(rows.len(), 3);

        // MJD 60462 is 2024-06-01
        assert_eq!(rows[0].time, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(rows[0].num_sats, 12);
        assert_eq!(rows[0].pdop, 1.23);
        assert_eq!(rows[0].x, -2575288.1234);

        assert_eq!(rows[1].num_sats, 11);
        assert_eq!(rows[1].time, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 1).unwrap());

        // no satellite count on this row
        assert_eq!(rows[2].num_sats, 1);
        assert_eq!(rows[2].pdop, 1.40);
    }

    #[test]
    fn test_missing_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kin_bad");
        std::fs::write(&path, "60462 0.0 1 2 3 4 5 6 7 8\n").unwrap();
        assert!(matches!(parse_kin_file(&path), Err(ToolError::Parse { .. })));
    }

    #[test]
    fn test_header_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kin_empty");
        std::fs::write(&path, "END OF HEADER\ncolumns\n").unwrap();
        assert!(matches!(parse_kin_file(&path), Err(ToolError::NoOutput(_))));
    }
}
