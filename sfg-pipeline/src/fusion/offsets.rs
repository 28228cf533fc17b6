//! Offset statistics between smoothed and observed positions

use super::kalman::SmoothedState;
use super::prepare::Observation;
use std::fmt;

/// Summary of one axis of absolute offsets
#[derive(Debug, Clone, PartialEq)]
pub struct AxisStats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; `None` below two values
    pub std: Option<f64>,
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub max: f64,
}

impl AxisStats {
    fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let std = (n > 1).then(|| {
            let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
            (ss / (n - 1) as f64).sqrt()
        });

        Some(Self {
            count: n,
            mean,
            std,
            min: values[0],
            p25: quantile(&values, 0.25),
            median: quantile(&values, 0.5),
            p75: quantile(&values, 0.75),
            max: values[n - 1],
        })
    }
}

/// Linear-interpolated quantile of sorted values
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Per-axis offsets of the smoothed track from the velocity-bearing observations
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetReport {
    pub x: AxisStats,
    pub y: AxisStats,
    pub z: AxisStats,
}

impl fmt::Display for OffsetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (axis, s) in [("x", &self.x), ("y", &self.y), ("z", &self.z)] {
            writeln!(
                f,
                "{}: n={} mean={:.4} std={} min={:.4} 25%={:.4} 50%={:.4} 75%={:.4} max={:.4}",
                axis,
                s.count,
                s.mean,
                s.std.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v)),
                s.min,
                s.p25,
                s.median,
                s.p75,
                s.max
            )?;
        }
        Ok(())
    }
}

/// Match each observation to the nearest smoothed state within `tolerance` seconds
///
/// `smoothed` must be time ordered. Returns `None` when nothing matches.
pub fn offset_report(
    observations: &[Observation],
    smoothed: &[SmoothedState],
    tolerance: f64,
) -> Option<OffsetReport> {
    let mut axes: [Vec<f64>; 3] = Default::default();

    for obs in observations {
        let idx = smoothed.partition_point(|s| s.time < obs.time);
        let nearest = [idx.checked_sub(1), Some(idx)]
            .into_iter()
            .flatten()
            .filter_map(|i| smoothed.get(i))
            .min_by(|a, b| (a.time - obs.time).abs().total_cmp(&(b.time - obs.time).abs()));

        if let Some(state) = nearest.filter(|s| (s.time - obs.time).abs() <= tolerance) {
            for (axis, values) in axes.iter_mut().enumerate() {
                values.push((state.position[axis] - obs.position[axis]).abs());
            }
        }
    }

    let [x, y, z] = axes;
    Some(OffsetReport {
        x: AxisStats::from_values(x)?,
        y: AxisStats::from_values(y)?,
        z: AxisStats::from_values(z)?,
    })
}
