//! Observation preparation: frame conversion, gap filling and outlier rejection

use super::geodesy::{enu_sigmas_to_ecef_covariance, enu_to_ecef_rotation, geodetic_to_ecef};
use crate::timeseries::{ImuPosition, KinPosition};
use chrono::{DateTime, Utc};
use nalgebra::{Matrix3, Vector3};

/// Maps timestamps onto f64 seconds from a fixed origin
#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    origin_us: i64,
}

impl TimeBase {
    pub fn new(origin: DateTime<Utc>) -> Self {
        Self {
            origin_us: origin.timestamp_micros(),
        }
    }

    pub fn seconds(&self, t: DateTime<Utc>) -> f64 {
        (t.timestamp_micros() - self.origin_us) as f64 * 1e-6
    }
}

/// One row of the unified observation table fed to the smoother
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub time: f64,
    /// ECEF position (m)
    pub position: Vector3<f64>,
    /// ECEF velocity (m/s)
    pub velocity: Vector3<f64>,
    pub position_cov: Matrix3<f64>,
    pub velocity_cov: Matrix3<f64>,
}

impl Observation {
    pub fn is_finite(&self) -> bool {
        self.time.is_finite()
            && self.position.iter().all(|v| v.is_finite())
            && self.velocity.iter().all(|v| v.is_finite())
            && self.position_cov.iter().all(|v| v.is_finite())
            && self.velocity_cov.iter().all(|v| v.is_finite())
    }
}

/// Backward then forward fill; NaN where the whole column is missing
fn fill_gaps(values: &[Option<f64>]) -> Vec<f64> {
    let mut filled: Vec<Option<f64>> = values
        .iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect();

    let mut next = None;
    for v in filled.iter_mut().rev() {
        match v {
            Some(x) => next = Some(*x),
            None => *v = next,
        }
    }
    let mut prev = None;
    for v in filled.iter_mut() {
        match v {
            Some(x) => prev = Some(*x),
            None => *v = prev,
        }
    }

    filled.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect()
}

/// Velocity-bearing stream to ECEF observations
///
/// Position sigmas map latitude to north, longitude to east and height to up.
pub fn imu_observations(rows: &[ImuPosition], base: &TimeBase) -> Vec<Observation> {
    let column = |f: fn(&ImuPosition) -> Option<f64>| -> Vec<f64> {
        fill_gaps(&rows.iter().map(f).collect::<Vec<_>>())
    };
    let lat_std = column(|r| r.latitude_std);
    let lon_std = column(|r| r.longitude_std);
    let hgt_std = column(|r| r.height_std);
    let ve_std = column(|r| r.east_velocity_std);
    let vn_std = column(|r| r.north_velocity_std);
    let vu_std = column(|r| r.up_velocity_std);

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let rotation = enu_to_ecef_rotation(row.latitude, row.longitude);
            let enu_velocity = Vector3::new(row.east_velocity, row.north_velocity, row.up_velocity);
            Observation {
                time: base.seconds(row.time),
                position: geodetic_to_ecef(row.latitude, row.longitude, row.height),
                velocity: rotation * enu_velocity,
                position_cov: enu_sigmas_to_ecef_covariance(
                    &rotation, lon_std[i], lat_std[i], hgt_std[i],
                ),
                velocity_cov: enu_sigmas_to_ecef_covariance(
                    &rotation, ve_std[i], vn_std[i], vu_std[i],
                ),
            }
        })
        .collect()
}

/// Velocity-less stream to ECEF observations with finite-difference velocity
///
/// The first row takes the second row's velocity. A lone row has no velocity
/// and is left non-finite so it drops out before estimation.
pub fn kin_observations(
    rows: &[KinPosition],
    base: &TimeBase,
    position_sigma: f64,
    velocity_sigma: f64,
) -> Vec<Observation> {
    let mut sorted: Vec<&KinPosition> = rows.iter().collect();
    sorted.sort_by_key(|r| r.time);

    let position_cov = Matrix3::from_diagonal_element(position_sigma * position_sigma);
    let velocity_cov = Matrix3::from_diagonal_element(velocity_sigma * velocity_sigma);

    let mut observations: Vec<Observation> = sorted
        .iter()
        .map(|row| Observation {
            time: base.seconds(row.time),
            position: Vector3::new(row.x, row.y, row.z),
            velocity: Vector3::repeat(f64::NAN),
            position_cov,
            velocity_cov,
        })
        .collect();

    for i in 1..observations.len() {
        let dt = observations[i].time - observations[i - 1].time;
        let delta = observations[i].position - observations[i - 1].position;
        observations[i].velocity = delta / dt;
    }
    if observations.len() > 1 {
        observations[0].velocity = observations[1].velocity;
    }

    observations
}

/// Population mean and standard deviation over finite values
fn finite_moments(values: impl Iterator<Item = f64> + Clone) -> Option<(f64, f64)> {
    let finite = values.filter(|v| v.is_finite());
    let n = finite.clone().count();
    if n == 0 {
        return None;
    }
    let mean = finite.clone().sum::<f64>() / n as f64;
    let var = finite.map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
    Some((mean, var.sqrt()))
}

/// Drop rows whose derived speed is a z-score outlier on any axis
///
/// Scores use the absolute velocity per axis, so a track that reverses
/// direction does not widen the spread. Rows are kept when |z| < threshold on
/// every axis. Non-finite velocities never pass. An axis with zero spread
/// scores 0.
pub fn reject_velocity_spikes(observations: Vec<Observation>, threshold: f64) -> Vec<Observation> {
    let moments: Vec<Option<(f64, f64)>> = (0..3)
        .map(|axis| finite_moments(observations.iter().map(move |o| o.velocity[axis].abs())))
        .collect();

    observations
        .into_iter()
        .filter(|o| {
            (0..3).all(|axis| {
                let v = o.velocity[axis].abs();
                match moments[axis] {
                    Some((mean, std)) if v.is_finite() => {
                        let z = if std > 0.0 { (v - mean) / std } else { 0.0 };
                        z.abs() < threshold
                    }
                    _ => false,
                }
            })
        })
        .collect()
}

/// Per-axis median of the finite positions
pub fn median_position(observations: &[Observation]) -> Option<Vector3<f64>> {
    let mut out = Vector3::zeros();
    for axis in 0..3 {
        let mut values: Vec<f64> = observations
            .iter()
            .map(|o| o.position[axis])
            .filter(|v| v.is_finite())
            .collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let mid = values.len() / 2;
        out[axis] = if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        };
    }
    Some(out)
}

/// Keep rows inside an inclusive per-axis box of `radius` around `reference`
pub fn within_radius(
    observations: Vec<Observation>,
    reference: &Vector3<f64>,
    radius: f64,
) -> Vec<Observation> {
    observations
        .into_iter()
        .filter(|o| (0..3).all(|axis| (o.position[axis] - reference[axis]).abs() <= radius))
        .collect()
}

/// Time-ordered union of both streams, minus non-finite rows
pub fn combine(imu: Vec<Observation>, kin: Vec<Observation>) -> Vec<Observation> {
    let mut all: Vec<Observation> = imu.into_iter().chain(kin).collect();
    all.sort_by(|a, b| a.time.total_cmp(&b.time));
    all.retain(Observation::is_finite);
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn kin_row(t: i64, x: f64) -> KinPosition {
        KinPosition {
            time: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(t),
            x,
            y: 2.0,
            z: 3.0,
            latitude: 44.0,
            longitude: 235.0,
            height: 10.0,
            num_sats: 9,
            pdop: 1.2,
        }
    }

    fn base() -> TimeBase {
        TimeBase::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_fill_gaps() {
        let filled = fill_gaps(&[None, Some(1.0), None, Some(f64::NAN), Some(3.0), None]);
        assert_eq!(filled, vec![1.0, 1.0, 3.0, 3.0, 3.0, 3.0]);

        let empty = fill_gaps(&[None, None]);
        assert!(empty.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_kin_velocity_backfilled() {
        let rows: Vec<KinPosition> = (0..4).map(|t| kin_row(t, 2.0 * t as f64)).collect();
        let obs = kin_observations(&rows, &base(), 0.1, 0.1);

        assert_eq!(obs.len(), 4);
        for o in &obs {
            assert_relative_eq!(o.velocity.x, 2.0);
            assert_relative_eq!(o.velocity.y, 0.0);
        }
        assert_relative_eq!(obs[0].position_cov[(0, 0)], 0.01, epsilon = 1e-15);
    }

    #[test]
    fn test_single_kin_row_is_not_finite() {
        let obs = kin_observations(&[kin_row(0, 1.0)], &base(), 0.1, 0.1);
        assert_eq!(obs.len(), 1);
        assert!(!obs[0].is_finite());
    }

    #[test]
    fn test_velocity_spike_rejected() {
        let mut rows: Vec<KinPosition> = (0..100).map(|t| kin_row(t, t as f64)).collect();
        rows[50].x += 100.0;

        let obs = kin_observations(&rows, &base(), 0.1, 0.1);
        let kept = reject_velocity_spikes(obs, 4.0);

        // Jump in and jump back out
        assert_eq!(kept.len(), 98);
        assert!(kept.iter().all(|o| (o.velocity.x - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_constant_velocity_survives_zscore() {
        let rows: Vec<KinPosition> = (0..10).map(|t| kin_row(t, t as f64)).collect();
        let obs = kin_observations(&rows, &base(), 0.1, 0.1);
        assert_eq!(reject_velocity_spikes(obs, 4.0).len(), 10);
    }

    #[test]
    fn test_velocity_spike_rejected_on_reversing_track() {
        // East for 50 s, then back west, with one 3 m/s step at t=70
        let rows: Vec<KinPosition> = (0..100)
            .map(|t| {
                let x = if t <= 50 { t as f64 } else { 100.0 - t as f64 };
                kin_row(t, if t >= 70 { x - 2.0 } else { x })
            })
            .collect();

        let obs = kin_observations(&rows, &base(), 0.1, 0.1);
        assert_relative_eq!(obs[70].velocity.x, -3.0, epsilon = 1e-9);

        let kept = reject_velocity_spikes(obs, 4.0);
        assert_eq!(kept.len(), 99);
        assert!(kept.iter().all(|o| (o.velocity.x.abs() - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_median_even_and_odd() {
        let obs: Vec<Observation> = kin_observations(
            &[kin_row(0, 1.0), kin_row(1, 5.0), kin_row(2, 3.0)],
            &base(),
            0.1,
            0.1,
        );
        assert_relative_eq!(median_position(&obs).unwrap().x, 3.0);
        assert_relative_eq!(median_position(&obs[..2]).unwrap().x, 3.0);
        assert!(median_position(&[]).is_none());
    }

    #[test]
    fn test_radius_is_inclusive() {
        let obs = kin_observations(
            &[kin_row(0, 0.0), kin_row(1, 10.0), kin_row(2, 10.5)],
            &base(),
            0.1,
            0.1,
        );
        let kept = within_radius(obs, &Vector3::new(0.0, 2.0, 3.0), 10.0);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_radius_drops_only_the_distant_row() {
        // Twenty rows spread within 100 m of the median, one 10 km out
        let mut rows: Vec<KinPosition> = (0..20)
            .map(|t| kin_row(t, ((t % 5) as f64 - 2.0) * 45.0))
            .collect();
        rows.push(kin_row(20, 10_000.0));

        let obs = kin_observations(&rows, &base(), 0.1, 0.1);
        let median = median_position(&obs).unwrap();
        assert!(median.x.abs() <= 100.0);

        let kept = within_radius(obs, &median, 5000.0);
        assert_eq!(kept.len(), 20);
        assert!(kept.iter().all(|o| o.position.x.abs() <= 100.0));
    }

    #[test]
    fn test_combine_sorts_and_drops_invalid() {
        let mut obs = kin_observations(
            &[kin_row(0, 0.0), kin_row(1, 1.0), kin_row(2, 2.0)],
            &base(),
            0.1,
            0.1,
        );
        let late = obs.remove(2);
        let mut bad = obs[0].clone();
        bad.time = 0.5;
        bad.position.z = f64::NAN;

        let combined = combine(vec![late, bad], obs);
        let times: Vec<f64> = combined.iter().map(|o| o.time).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
    }
}
