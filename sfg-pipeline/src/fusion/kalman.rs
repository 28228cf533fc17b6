//! Constant-velocity Kalman filter with Rauch-Tung-Striebel smoothing
//!
//! State is `[position; velocity]` in a common frame. Every observation measures the
//! full state (H = I), with block-diagonal noise from the observation covariances.

use super::prepare::Observation;
use nalgebra::{Matrix3, Matrix6, Vector3, Vector6};

/// Fixed smoother parameters
#[derive(Debug, Clone, Copy)]
pub struct SmootherParams {
    /// Position process-noise spectral density
    pub pos_psd: f64,
    /// Velocity process-noise spectral density
    pub vel_psd: f64,
    /// Initial state variance on every axis
    pub cov_err: f64,
    /// Interval used for the step leading into the first observation
    pub start_dt: f64,
}

/// Smoothed estimate at one observation time
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedState {
    pub time: f64,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub position_cov: Matrix3<f64>,
}

impl SmoothedState {
    /// Per-axis standard deviation of the position
    pub fn position_std(&self) -> Vector3<f64> {
        self.position_cov.diagonal().map(|v| v.max(0.0).sqrt())
    }
}

fn transition(dt: f64) -> Matrix6<f64> {
    let mut f = Matrix6::identity();
    for i in 0..3 {
        f[(i, i + 3)] = dt;
    }
    f
}

fn process_noise(params: &SmootherParams, dt: f64) -> Matrix6<f64> {
    let dt = dt.abs();
    let mut q = Matrix6::zeros();
    for i in 0..3 {
        q[(i, i)] = params.pos_psd * dt;
        q[(i + 3, i + 3)] = params.vel_psd * dt;
    }
    q
}

fn measurement(obs: &Observation) -> (Vector6<f64>, Matrix6<f64>) {
    let mut z = Vector6::zeros();
    z.fixed_rows_mut::<3>(0).copy_from(&obs.position);
    z.fixed_rows_mut::<3>(3).copy_from(&obs.velocity);

    let mut r = Matrix6::zeros();
    r.fixed_view_mut::<3, 3>(0, 0).copy_from(&obs.position_cov);
    r.fixed_view_mut::<3, 3>(3, 3).copy_from(&obs.velocity_cov);
    (z, r)
}

/// Forward filter plus backward smoothing pass over time-sorted observations
///
/// The state starts at the first observation, placed `start_dt` earlier so the
/// first step is an ordinary predict/update. An update whose innovation
/// covariance cannot be inverted keeps the prediction.
pub fn smooth(observations: &[Observation], params: &SmootherParams) -> Vec<SmoothedState> {
    let Some(first) = observations.first() else {
        return Vec::new();
    };

    let n = observations.len();
    let mut predicted: Vec<(Vector6<f64>, Matrix6<f64>)> = Vec::with_capacity(n);
    let mut filtered: Vec<(Vector6<f64>, Matrix6<f64>)> = Vec::with_capacity(n);
    let mut transitions: Vec<Matrix6<f64>> = Vec::with_capacity(n);

    let mut x = Vector6::zeros();
    x.fixed_rows_mut::<3>(0)
        .copy_from(&(first.position - first.velocity * params.start_dt));
    x.fixed_rows_mut::<3>(3).copy_from(&first.velocity);
    let mut p = Matrix6::identity() * params.cov_err;
    let mut last_time = first.time - params.start_dt;

    for obs in observations {
        let dt = obs.time - last_time;
        let f = transition(dt);
        let x_pred = f * x;
        let p_pred = f * p * f.transpose() + process_noise(params, dt);

        let (z, r) = measurement(obs);
        let s = p_pred + r;
        let (x_upd, p_upd) = match s.try_inverse() {
            Some(s_inv) => {
                let k = p_pred * s_inv;
                let i_k = Matrix6::identity() - k;
                let p_upd = i_k * p_pred * i_k.transpose() + k * r * k.transpose();
                (x_pred + k * (z - x_pred), p_upd)
            }
            None => (x_pred, p_pred),
        };

        transitions.push(f);
        predicted.push((x_pred, p_pred));
        filtered.push((x_upd, p_upd));
        x = x_upd;
        p = p_upd;
        last_time = obs.time;
    }

    let mut smoothed = filtered.clone();
    for k in (0..n.saturating_sub(1)).rev() {
        let (x_f, p_f) = &filtered[k];
        let (x_p, p_p) = &predicted[k + 1];
        let Some(p_p_inv) = p_p.try_inverse() else {
            continue;
        };
        let c = p_f * transitions[k + 1].transpose() * p_p_inv;
        let (x_next, p_next) = smoothed[k + 1];
        smoothed[k] = (x_f + c * (x_next - x_p), p_f + c * (p_next - p_p) * c.transpose());
    }

    observations
        .iter()
        .zip(smoothed)
        .map(|(obs, (x, p))| SmoothedState {
            time: obs.time,
            position: x.fixed_rows::<3>(0).into_owned(),
            velocity: x.fixed_rows::<3>(3).into_owned(),
            position_cov: p.fixed_view::<3, 3>(0, 0).into_owned(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params() -> SmootherParams {
        SmootherParams {
            pos_psd: 3.125e-5,
            vel_psd: 0.0025,
            cov_err: 0.25,
            start_dt: 0.25,
        }
    }

    fn obs(time: f64, position: Vector3<f64>, velocity: Vector3<f64>) -> Observation {
        Observation {
            time,
            position,
            velocity,
            position_cov: Matrix3::from_diagonal_element(0.01),
            velocity_cov: Matrix3::from_diagonal_element(0.01),
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(smooth(&[], &params()).is_empty());
    }

    #[test]
    fn test_converges_on_noiseless_constant_velocity() {
        let v = Vector3::new(1.5, -0.5, 0.1);
        let start = Vector3::new(10.0, 20.0, 30.0);
        let data: Vec<Observation> = (0..200)
            .map(|i| {
                let t = i as f64 * 0.5;
                obs(t, start + v * t, v)
            })
            .collect();

        let out = smooth(&data, &params());
        assert_eq!(out.len(), data.len());
        for (state, o) in out.iter().zip(&data) {
            assert_relative_eq!(state.position, o.position, epsilon = 1e-6);
            assert_relative_eq!(state.velocity, v, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_smoothing_reduces_uncertainty() {
        let data: Vec<Observation> = (0..50)
            .map(|i| obs(i as f64, Vector3::zeros(), Vector3::zeros()))
            .collect();
        let out = smooth(&data, &params());

        let std = out[25].position_std();
        assert!(std.x > 0.0);
        assert!(std.x < 0.1);
        assert_relative_eq!(out[25].position_cov, out[25].position_cov.transpose(), epsilon = 1e-12);
    }

    #[test]
    fn test_outlier_is_damped() {
        let mut data: Vec<Observation> = (0..41)
            .map(|i| obs(i as f64 * 0.25, Vector3::zeros(), Vector3::zeros()))
            .collect();
        data[20].position = Vector3::new(1.0, 0.0, 0.0);

        let out = smooth(&data, &params());
        assert!(out[20].position.x > 0.0);
        assert!(out[20].position.x < 1.0);
    }
}
