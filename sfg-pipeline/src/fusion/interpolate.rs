//! Radius-limited, inverse-distance weighted interpolation in time

use nalgebra::Vector3;

/// Interpolator over `(time, position)` samples
///
/// Every sample within `radius` seconds of the query contributes with weight
/// `1 / |dt|`. A sample at exactly the query time takes over; several such
/// samples are averaged. No sample in range means no answer.
#[derive(Debug, Clone)]
pub struct RadiusInterpolator {
    times: Vec<f64>,
    values: Vec<Vector3<f64>>,
    radius: f64,
}

impl RadiusInterpolator {
    pub fn new(samples: impl IntoIterator<Item = (f64, Vector3<f64>)>, radius: f64) -> Self {
        let mut samples: Vec<(f64, Vector3<f64>)> = samples
            .into_iter()
            .filter(|(t, v)| t.is_finite() && v.iter().all(|c| c.is_finite()))
            .collect();
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (times, values) = samples.into_iter().unzip();
        Self {
            times,
            values,
            radius,
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn predict(&self, time: f64) -> Option<Vector3<f64>> {
        if !time.is_finite() {
            return None;
        }
        let lo = self.times.partition_point(|t| *t < time - self.radius);
        let hi = self.times.partition_point(|t| *t <= time + self.radius);
        if lo >= hi {
            return None;
        }

        let window = lo..hi;
        let exact: Vec<&Vector3<f64>> = window
            .clone()
            .filter(|&i| self.times[i] == time)
            .map(|i| &self.values[i])
            .collect();
        if !exact.is_empty() {
            let sum: Vector3<f64> = exact.iter().copied().sum();
            return Some(sum / exact.len() as f64);
        }

        let mut weighted = Vector3::zeros();
        let mut total = 0.0;
        for i in window {
            let w = 1.0 / (self.times[i] - time).abs();
            weighted += self.values[i] * w;
            total += w;
        }
        Some(weighted / total)
    }
}
