//! Quality gate in front of the position filter.
//!
//! Drops fixes that are too inaccurate to use and fixes that sit inside the
//! jitter radius of the last accepted fix. The movement threshold widens with
//! worse accuracy and tightens further when the device reports standing still.

use crate::config::AdmissionConfig;
use crate::geo::planar_distance_m;
use crate::types::{GeoPoint, RawFix};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Reported accuracy worse than the configured maximum
    PoorAccuracy,
    /// Moved less than the adaptive minimum-movement threshold
    Jitter,
    /// Near-zero reported speed and inside the stationary threshold
    StationaryDrift,
    /// Capture time not after the previous accepted fix
    OutOfOrder,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AdmissionVerdict {
    Accepted,
    Rejected(RejectReason),
}

impl AdmissionVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AdmissionVerdict::Accepted)
    }
}

/// max(floor, min(accuracy · factor, cap))
fn movement_threshold(accuracy: f64, floor: f64, factor: f64, cap: f64) -> f64 {
    floor.max((accuracy * factor).min(cap))
}

/// Pure admission predicate against the previous accepted point.
///
/// A missing accuracy skips the accuracy gate and leaves only the threshold floors.
pub fn admit(prev: Option<&GeoPoint>, fix: &RawFix, config: &AdmissionConfig) -> AdmissionVerdict {
    if let Some(acc) = fix.accuracy {
        if acc > config.max_accuracy_m {
            return AdmissionVerdict::Rejected(RejectReason::PoorAccuracy);
        }
    }

    let Some(prev) = prev else {
        return AdmissionVerdict::Accepted;
    };

    let seg = planar_distance_m(prev, &fix.point());
    let accuracy = fix.accuracy.unwrap_or(0.0);

    let min_move = movement_threshold(
        accuracy,
        config.min_move_floor_m,
        config.min_move_accuracy_factor,
        config.min_move_cap_m,
    );
    if seg < min_move {
        return AdmissionVerdict::Rejected(RejectReason::Jitter);
    }

    if let Some(speed) = fix.speed {
        if (0.0..config.stationary_speed_mps).contains(&speed) {
            let stationary_move = movement_threshold(
                accuracy,
                config.stationary_floor_m,
                config.stationary_accuracy_factor,
                config.stationary_cap_m,
            );
            if seg < stationary_move {
                return AdmissionVerdict::Rejected(RejectReason::StationaryDrift);
            }
        }
    }

    AdmissionVerdict::Accepted
}

/// Stateful wrapper remembering the last accepted fix.
pub struct AdmissionFilter {
    config: AdmissionConfig,
    last_accepted: Option<RawFix>,
}

impl AdmissionFilter {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            last_accepted: None,
        }
    }

    /// Judge a fix; on acceptance it becomes the new reference point.
    pub fn check(&mut self, fix: &RawFix) -> AdmissionVerdict {
        if let Some(last) = &self.last_accepted {
            if fix.timestamp <= last.timestamp {
                return AdmissionVerdict::Rejected(RejectReason::OutOfOrder);
            }
        }

        let prev = self.last_accepted.map(|f| f.point());
        let verdict = admit(prev.as_ref(), fix, &self.config);
        if verdict.is_accepted() {
            self.last_accepted = Some(*fix);
        }
        verdict
    }

    pub fn last_accepted(&self) -> Option<&RawFix> {
        self.last_accepted.as_ref()
    }
}
