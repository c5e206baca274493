//! Geographic front-end for [`Kalman2d`]: projects fixes into the run's local
//! frame, filters them, and hands back degrees.

use super::Kalman2d;
use crate::config::KalmanConfig;
use crate::geo::LocalFrame;
use crate::types::{GeoPoint, RawFix};

pub struct PositionFilter {
    config: KalmanConfig,
    kf: Kalman2d,
    /// Fixed for the lifetime of a run once the first fix arrives
    frame: Option<LocalFrame>,
    last_timestamp: Option<i64>,
}

impl PositionFilter {
    pub fn new(config: KalmanConfig) -> Self {
        let kf = Self::build_filter(&config);
        Self {
            config,
            kf,
            frame: None,
            last_timestamp: None,
        }
    }

    fn build_filter(config: &KalmanConfig) -> Kalman2d {
        Kalman2d::new(
            config.process_noise,
            config.base_measurement_noise_m,
            config.min_measurement_noise_m,
            config.min_dt_secs,
        )
    }

    /// Filter one admitted fix. The first fix seeds the filter and anchors the frame;
    /// every later fix runs predict-then-update.
    pub fn filter(&mut self, fix: &RawFix) -> GeoPoint {
        let frame = *self.frame.get_or_insert_with(|| LocalFrame::new(fix.point()));
        let z = frame.project(&fix.point());

        match self.last_timestamp {
            Some(last) if self.kf.is_initialized() => {
                let dt = (fix.timestamp - last) as f64 / 1000.0;
                self.kf.predict(dt);
                self.kf.update(&z, fix.accuracy);
            }
            _ => self.kf.init(&z),
        }
        self.last_timestamp = Some(fix.timestamp);

        frame.unproject(&self.kf.position())
    }

    /// Restart estimation at the next fix without moving the origin.
    pub fn reseed(&mut self) {
        self.kf = Self::build_filter(&self.config);
        self.last_timestamp = None;
    }

    pub fn origin(&self) -> Option<GeoPoint> {
        self.frame.map(|f| f.origin())
    }

    pub fn kalman(&self) -> &Kalman2d {
        &self.kf
    }
}
