//! Shot-position refinement by Kalman smoothing of GNSS/INS positions
//!
//! Acoustic shots carry transducer positions derived from the attitude stream,
//! which are less accurate than the kinematic GNSS solutions. This module fuses
//! the velocity-bearing INS positions with the velocity-less PPP positions into
//! a smoothed ECEF track, then re-samples that track at every ping-send and
//! reply-receive instant.
//!
//! Everything here is synchronous and pure; the orchestrator runs it on the
//! blocking pool.

pub mod geodesy;
pub mod interpolate;
pub mod kalman;
pub mod offsets;
pub mod prepare;

pub use interpolate::RadiusInterpolator;
pub use kalman::{smooth, SmoothedState, SmootherParams};
pub use offsets::{offset_report, AxisStats, OffsetReport};
pub use prepare::{Observation, TimeBase};

use crate::timeseries::{ImuPosition, KinPosition, ShotRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Tuning for the refinement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub gnss_pos_psd: f64,
    pub vel_psd: f64,
    pub cov_err: f64,
    /// Seconds
    pub start_dt: f64,
    /// Metres per axis around the median; 0 disables the guard
    pub filter_radius: f64,
    pub interpolation_radius_s: f64,
    pub zscore_threshold: f64,
    pub kin_position_sigma: f64,
    pub kin_velocity_sigma: f64,
    /// Nearest-time tolerance for the offset report
    pub offset_match_tolerance_s: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            gnss_pos_psd: 3.125e-5,
            vel_psd: 0.0025,
            cov_err: 0.25,
            start_dt: 0.25,
            filter_radius: 5000.0,
            interpolation_radius_s: 0.2,
            zscore_threshold: 4.0,
            kin_position_sigma: 0.1,
            kin_velocity_sigma: 0.1,
            offset_match_tolerance_s: 0.01,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), FusionError> {
        let checks = [
            ("gnss_pos_psd", self.gnss_pos_psd),
            ("vel_psd", self.vel_psd),
            ("cov_err", self.cov_err),
            ("start_dt", self.start_dt),
            ("filter_radius", self.filter_radius),
            ("interpolation_radius_s", self.interpolation_radius_s),
            ("zscore_threshold", self.zscore_threshold),
            ("kin_position_sigma", self.kin_position_sigma),
            ("kin_velocity_sigma", self.kin_velocity_sigma),
            ("offset_match_tolerance_s", self.offset_match_tolerance_s),
        ];
        for (name, value) in checks {
            if !value.is_finite() || value < 0.0 {
                return Err(FusionError::invalid_config(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.cov_err == 0.0 {
            return Err(FusionError::invalid_config("cov_err must be positive"));
        }
        Ok(())
    }

    fn smoother_params(&self) -> SmootherParams {
        SmootherParams {
            pos_psd: self.gnss_pos_psd,
            vel_psd: self.vel_psd,
            cov_err: self.cov_err,
            start_dt: self.start_dt,
        }
    }
}

#[derive(Debug, Error)]
pub enum FusionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FusionError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }
}

/// Refined shots plus diagnostics
#[derive(Debug, Clone)]
pub struct FusionOutcome {
    pub shots: Vec<ShotRecord>,
    /// Shots with at least one overwritten position
    pub updated: usize,
    /// Ping or reply instants with no smoothed sample in range
    pub unresolved: usize,
    pub offsets: Option<OffsetReport>,
}

impl FusionOutcome {
    fn unchanged(shots: &[ShotRecord]) -> Self {
        Self {
            shots: shots.to_vec(),
            updated: 0,
            unresolved: 0,
            offsets: None,
        }
    }
}

/// Refine shot transducer positions for one window of data
///
/// Shot identity and times are never changed. Instants with no smoothed sample
/// within `interpolation_radius_s` keep their original position.
pub fn refine_shot_positions(
    shots: &[ShotRecord],
    imu: &[ImuPosition],
    kin: &[KinPosition],
    config: &FusionConfig,
) -> Result<FusionOutcome, FusionError> {
    config.validate()?;

    if shots.is_empty() {
        info!("No shots to refine");
        return Ok(FusionOutcome::unchanged(shots));
    }
    let Some(origin) = imu.iter().map(|r| r.time).min() else {
        info!(shots = shots.len(), "No INS positions provided, shots left unchanged");
        return Ok(FusionOutcome::unchanged(shots));
    };
    let base = TimeBase::new(origin);

    let imu_obs = prepare::imu_observations(imu, &base);
    let Some(reference) = prepare::median_position(&imu_obs) else {
        info!("INS positions have no finite coordinates, shots left unchanged");
        return Ok(FusionOutcome::unchanged(shots));
    };

    let kin_obs = if kin.is_empty() {
        info!("No kinematic positions provided, smoothing INS positions only");
        Vec::new()
    } else {
        let derived = prepare::kin_observations(
            kin,
            &base,
            config.kin_position_sigma,
            config.kin_velocity_sigma,
        );
        let before = derived.len();
        let kept = prepare::reject_velocity_spikes(derived, config.zscore_threshold);
        debug!(rejected = before - kept.len(), "Velocity spike filter applied");
        kept
    };

    let (imu_obs, kin_obs) = if config.filter_radius > 0.0 {
        let counts = (imu_obs.len(), kin_obs.len());
        let imu_kept = prepare::within_radius(imu_obs, &reference, config.filter_radius);
        let kin_kept = prepare::within_radius(kin_obs, &reference, config.filter_radius);
        debug!(
            ins_rejected = counts.0 - imu_kept.len(),
            kin_rejected = counts.1 - kin_kept.len(),
            radius = config.filter_radius,
            "Spatial outlier filter applied"
        );
        (imu_kept, kin_kept)
    } else {
        (imu_obs, kin_obs)
    };

    let mut combined = prepare::combine(imu_obs.clone(), kin_obs);
    if combined.is_empty() {
        info!("No valid observations after filtering, shots left unchanged");
        return Ok(FusionOutcome::unchanged(shots));
    }

    // Smooth about the reference point to keep the covariance arithmetic well scaled
    for obs in &mut combined {
        obs.position -= reference;
    }
    let mut smoothed = smooth(&combined, &config.smoother_params());
    for state in &mut smoothed {
        state.position += reference;
    }

    let offsets = offset_report(&imu_obs, &smoothed, config.offset_match_tolerance_s);
    if let Some(report) = &offsets {
        debug!("Smoothed vs INS position offsets:\n{}", report);
    }

    let interpolator = RadiusInterpolator::new(
        smoothed.iter().map(|s| (s.time, s.position)),
        config.interpolation_radius_s,
    );

    let mut refined = shots.to_vec();
    let mut updated = 0;
    let mut unresolved = 0;
    for shot in &mut refined {
        let mut touched = false;
        match interpolator.predict(base.seconds(shot.ping_time)) {
            Some(p) => {
                shot.east0 = p.x;
                shot.north0 = p.y;
                shot.up0 = p.z;
                touched = true;
            }
            None => unresolved += 1,
        }
        match interpolator.predict(base.seconds(shot.return_time)) {
            Some(p) => {
                shot.east1 = p.x;
                shot.north1 = p.y;
                shot.up1 = p.z;
                touched = true;
            }
            None => unresolved += 1,
        }
        if touched {
            shot.is_updated = true;
            updated += 1;
        }
    }

    if unresolved > 0 {
        warn!(
            unresolved,
            radius_s = config.interpolation_radius_s,
            "Shot instants without a smoothed position in range"
        );
    }
    info!(
        shots = refined.len(),
        updated,
        observations = combined.len(),
        "Shot positions refined"
    );

    Ok(FusionOutcome {
        shots: refined,
        updated,
        unresolved,
        offsets,
    })
}
