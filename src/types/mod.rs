pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Geographic position in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Raw position report from the platform location provider.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters (smaller is better)
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// Instantaneous speed reported by the provider (m/s)
    #[serde(default)]
    pub speed: Option<f64>,
    /// Capture time, epoch milliseconds
    pub timestamp: i64,
}

impl RawFix {
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            speed: None,
            timestamp,
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// One entry of a recorded run log, replayed in order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    Fix(RawFix),
    Pause { timestamp: i64 },
    Resume { timestamp: i64 },
}

impl ReplayEvent {
    pub fn timestamp(&self) -> i64 {
        match self {
            ReplayEvent::Fix(fix) => fix.timestamp,
            ReplayEvent::Pause { timestamp } | ReplayEvent::Resume { timestamp } => *timestamp,
        }
    }
}
