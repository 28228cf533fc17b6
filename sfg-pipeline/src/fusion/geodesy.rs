//! WGS84 geodetic helpers

use nalgebra::{Matrix3, Vector3};

/// WGS84 semi-major axis (m)
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

fn first_eccentricity_squared() -> f64 {
    WGS84_F * (2.0 - WGS84_F)
}

/// Geodetic latitude/longitude (degrees) and ellipsoidal height (m) to ECEF (m)
pub fn geodetic_to_ecef(latitude_deg: f64, longitude_deg: f64, height: f64) -> Vector3<f64> {
    let lat = latitude_deg.to_radians();
    let lon = longitude_deg.to_radians();
    let e2 = first_eccentricity_squared();

    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();

    Vector3::new(
        (n + height) * cos_lat * cos_lon,
        (n + height) * cos_lat * sin_lon,
        (n * (1.0 - e2) + height) * sin_lat,
    )
}

/// Rotation taking local east/north/up vectors at (lat, lon) into ECEF
///
/// Columns are the east, north and up unit vectors expressed in ECEF.
pub fn enu_to_ecef_rotation(latitude_deg: f64, longitude_deg: f64) -> Matrix3<f64> {
    let (sin_lat, cos_lat) = latitude_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = longitude_deg.to_radians().sin_cos();

    Matrix3::new(
        -sin_lon,
        -sin_lat * cos_lon,
        cos_lat * cos_lon,
        cos_lon,
        -sin_lat * sin_lon,
        cos_lat * sin_lon,
        0.0,
        cos_lat,
        sin_lat,
    )
}

/// Rotate a diagonal ENU covariance (given as sigmas) into ECEF
pub fn enu_sigmas_to_ecef_covariance(
    rotation: &Matrix3<f64>,
    east: f64,
    north: f64,
    up: f64,
) -> Matrix3<f64> {
    let diag = Matrix3::from_diagonal(&Vector3::new(east * east, north * north, up * up));
    rotation * diag * rotation.transpose()
}
