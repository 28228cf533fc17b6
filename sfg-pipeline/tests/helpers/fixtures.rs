//! Campaign files, fake programs and series rows for tests

use chrono::{DateTime, Duration, TimeZone, Utc};
use sfg_pipeline::fusion::geodesy::geodetic_to_ecef;
use sfg_pipeline::models::Scope;
use sfg_pipeline::timeseries::{ImuPosition, KinPosition, ShotRecord};
use std::path::{Path, PathBuf};

pub fn test_scope() -> Scope {
    Scope::new("cascadia", "NCC1", "2024_A_1126")
}

/// Midnight of the day every fixture row falls on
pub fn day_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

/// Write non-empty files named `names` under `dir`
pub fn seed_files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    std::fs::create_dir_all(dir).unwrap();
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, format!("contents of {}\n", name)).unwrap();
            path
        })
        .collect()
}

/// Executable shell script; `$2` is the output directory, inputs follow it
#[cfg(unix)]
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\nout=\"$2\"\nshift 2\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub const LATITUDE: f64 = 45.3;
pub const LONGITUDE: f64 = 235.04;
pub const HEIGHT: f64 = -30.0;

/// Stationary INS epoch at the fixture site
pub fn imu_row(t: DateTime<Utc>) -> ImuPosition {
    ImuPosition {
        time: t,
        latitude: LATITUDE,
        longitude: LONGITUDE,
        height: HEIGHT,
        east_velocity: 0.0,
        north_velocity: 0.0,
        up_velocity: 0.0,
        latitude_std: Some(0.05),
        longitude_std: Some(0.05),
        height_std: Some(0.1),
        east_velocity_std: Some(0.01),
        north_velocity_std: Some(0.01),
        up_velocity_std: Some(0.01),
    }
}

/// PPP epoch at the fixture site, `offset` metres from it along ECEF x
pub fn kin_row(t: DateTime<Utc>, offset: f64) -> KinPosition {
    let p = geodetic_to_ecef(LATITUDE, LONGITUDE, HEIGHT);
    KinPosition {
        time: t,
        x: p.x + offset,
        y: p.y,
        z: p.z,
        latitude: LATITUDE,
        longitude: LONGITUDE,
        height: HEIGHT,
        num_sats: 14,
        pdop: 1.2,
    }
}

/// Shot whose preliminary positions are all zero
pub fn shot_row(transponder: &str, ping: DateTime<Utc>) -> ShotRecord {
    let ret = ping + Duration::seconds(2);
    ShotRecord {
        transponder_id: transponder.to_string(),
        ping_time: ping,
        return_time: ret,
        travel_time: 2.0,
        east0: 0.0,
        north0: 0.0,
        up0: 0.0,
        east1: 0.0,
        north1: 0.0,
        up1: 0.0,
        is_updated: false,
    }
}
