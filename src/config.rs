//! Tunable constants for the tracking pipeline.
//!
//! Every field has a default, so a config file only needs to name what it overrides:
//!
//! ```json
//! { "sync": { "base_url": "https://api.example.com" }, "athlete": { "weight_kg": 62 } }
//! ```

use crate::error::{TrackerError, TrackerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Thresholds used to drop unusable or jittery fixes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Fixes reporting a worse accuracy than this are unusable (m)
    pub max_accuracy_m: f64,
    pub min_move_floor_m: f64,
    pub min_move_accuracy_factor: f64,
    pub min_move_cap_m: f64,
    /// Reported speeds in [0, this) count as standing still (m/s)
    pub stationary_speed_mps: f64,
    pub stationary_floor_m: f64,
    pub stationary_accuracy_factor: f64,
    pub stationary_cap_m: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 65.0,
            min_move_floor_m: 1.5,
            min_move_accuracy_factor: 0.3,
            min_move_cap_m: 3.0,
            stationary_speed_mps: 0.6,
            stationary_floor_m: 2.0,
            stationary_accuracy_factor: 0.5,
            stationary_cap_m: 4.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// Process-noise coefficient q
    pub process_noise: f64,
    /// Measurement noise used when a fix carries no accuracy (m)
    pub base_measurement_noise_m: f64,
    pub min_measurement_noise_m: f64,
    pub min_dt_secs: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            process_noise: 1.0,
            base_measurement_noise_m: 5.0,
            min_measurement_noise_m: 3.0,
            min_dt_secs: 0.05,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    /// Segments implying a faster speed are GPS spikes (m/s)
    pub spike_speed_mps: f64,
    pub noise_allowance_cap_m: f64,
    pub noise_allowance_accuracy_factor: f64,
    pub noise_allowance_segment_factor: f64,
    pub speed_window_secs: f64,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            spike_speed_mps: 6.5,
            noise_allowance_cap_m: 1.5,
            noise_allowance_accuracy_factor: 0.1,
            noise_allowance_segment_factor: 0.3,
            speed_window_secs: 5.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_ms: i64,
    pub distance_km: f64,
    /// Progress service root; `None` keeps the run offline
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub run_type: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            distance_km: 0.05,
            base_url: None,
            request_timeout_secs: 10,
            run_type: "free".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AthleteConfig {
    pub weight_kg: f64,
}

impl Default for AthleteConfig {
    fn default() -> Self {
        Self { weight_kg: 70.0 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub admission: AdmissionConfig,
    pub kalman: KalmanConfig,
    pub integrator: IntegratorConfig,
    pub sync: SyncConfig,
    pub athlete: AthleteConfig,
}

impl TrackerConfig {
    pub fn from_json_str(raw: &str) -> TrackerResult<Self> {
        let config: TrackerConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Reject thresholds that would silently disable a pipeline stage.
    pub fn validate(&self) -> TrackerResult<()> {
        let positive = [
            ("admission.max_accuracy_m", self.admission.max_accuracy_m),
            ("admission.min_move_floor_m", self.admission.min_move_floor_m),
            ("admission.stationary_floor_m", self.admission.stationary_floor_m),
            ("kalman.process_noise", self.kalman.process_noise),
            ("kalman.base_measurement_noise_m", self.kalman.base_measurement_noise_m),
            ("kalman.min_measurement_noise_m", self.kalman.min_measurement_noise_m),
            ("kalman.min_dt_secs", self.kalman.min_dt_secs),
            ("integrator.spike_speed_mps", self.integrator.spike_speed_mps),
            ("integrator.speed_window_secs", self.integrator.speed_window_secs),
            ("sync.distance_km", self.sync.distance_km),
            ("athlete.weight_kg", self.athlete.weight_kg),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(TrackerError::Config(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }

        let non_negative = [
            ("admission.min_move_accuracy_factor", self.admission.min_move_accuracy_factor),
            ("admission.min_move_cap_m", self.admission.min_move_cap_m),
            ("admission.stationary_speed_mps", self.admission.stationary_speed_mps),
            ("admission.stationary_accuracy_factor", self.admission.stationary_accuracy_factor),
            ("admission.stationary_cap_m", self.admission.stationary_cap_m),
            ("integrator.noise_allowance_cap_m", self.integrator.noise_allowance_cap_m),
            (
                "integrator.noise_allowance_accuracy_factor",
                self.integrator.noise_allowance_accuracy_factor,
            ),
            (
                "integrator.noise_allowance_segment_factor",
                self.integrator.noise_allowance_segment_factor,
            ),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(TrackerError::Config(format!(
                    "{name} must be zero or positive, got {value}"
                )));
            }
        }

        if self.integrator.noise_allowance_segment_factor >= 1.0 {
            return Err(TrackerError::Config(
                "integrator.noise_allowance_segment_factor must be below 1".to_string(),
            ));
        }
        if self.sync.interval_ms <= 0 {
            return Err(TrackerError::Config(format!(
                "sync.interval_ms must be positive, got {}",
                self.sync.interval_ms
            )));
        }
        Ok(())
    }
}
