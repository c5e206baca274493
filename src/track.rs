//! Turns filtered positions into a route, a cumulative distance and a
//! rolling speed.

use crate::config::IntegratorConfig;
use crate::geo::haversine_km;
use crate::types::{GeoPoint, RawFix};
use std::collections::VecDeque;

/// What a pushed point did to the totals
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SegmentOutcome {
    /// First point after start or re-anchoring; nothing to measure against
    Anchored,
    Advanced { segment_m: f64, added_m: f64 },
    /// Implied speed above the spike limit; distance untouched
    Spike { implied_mps: f64 },
}

#[derive(Clone, Copy, Debug)]
struct Anchor {
    point: GeoPoint,
    timestamp: i64,
    accuracy: Option<f64>,
}

/// Distance deducted from an accepted segment to offset GPS jitter.
///
/// min(cap, accuracy_factor · avg accuracy, segment_factor · segment). The average
/// uses whichever accuracies are known, falling back to `fallback_accuracy`.
pub fn noise_allowance_m(
    segment_m: f64,
    prev_accuracy: Option<f64>,
    accuracy: Option<f64>,
    fallback_accuracy: f64,
    config: &IntegratorConfig,
) -> f64 {
    let avg_accuracy = match (prev_accuracy, accuracy) {
        (Some(a), Some(b)) => (a + b) / 2.0,
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => fallback_accuracy,
    };
    config
        .noise_allowance_cap_m
        .min(config.noise_allowance_accuracy_factor * avg_accuracy)
        .min(config.noise_allowance_segment_factor * segment_m)
        .max(0.0)
}

pub struct TrackIntegrator {
    config: IntegratorConfig,
    fallback_accuracy: f64,
    route: Vec<GeoPoint>,
    anchor: Option<Anchor>,
    distance_km: f64,
    /// (timestamp ms, point) of recent non-spike samples
    window: VecDeque<(i64, GeoPoint)>,
    spike_count: u64,
}

impl TrackIntegrator {
    pub fn new(config: IntegratorConfig, fallback_accuracy: f64) -> Self {
        Self {
            config,
            fallback_accuracy,
            route: Vec::new(),
            anchor: None,
            distance_km: 0.0,
            window: VecDeque::new(),
            spike_count: 0,
        }
    }

    /// Append a filtered point taken from `fix` and integrate the segment it closes.
    pub fn push(&mut self, filtered: GeoPoint, fix: &RawFix) -> SegmentOutcome {
        self.route.push(filtered);

        let Some(anchor) = self.anchor else {
            self.advance_anchor(filtered, fix);
            return SegmentOutcome::Anchored;
        };

        let segment_km = haversine_km(&anchor.point, &filtered);
        let segment_m = segment_km * 1000.0;
        let dt_secs = ((fix.timestamp - anchor.timestamp) as f64 / 1000.0).max(0.001);
        let implied_mps = segment_m / dt_secs;

        if implied_mps > self.config.spike_speed_mps {
            self.spike_count += 1;
            log::debug!(
                "Spike rejected: {:.1} m in {:.2}s ({:.1} m/s)",
                segment_m,
                dt_secs,
                implied_mps
            );
            return SegmentOutcome::Spike { implied_mps };
        }

        let allowance = noise_allowance_m(
            segment_m,
            anchor.accuracy,
            fix.accuracy,
            self.fallback_accuracy,
            &self.config,
        );
        let added_m = (segment_m - allowance).max(0.0);
        self.distance_km += added_m / 1000.0;
        self.advance_anchor(filtered, fix);

        SegmentOutcome::Advanced { segment_m, added_m }
    }

    fn advance_anchor(&mut self, point: GeoPoint, fix: &RawFix) {
        self.anchor = Some(Anchor {
            point,
            timestamp: fix.timestamp,
            accuracy: fix.accuracy,
        });

        self.window.push_back((fix.timestamp, point));
        let window_ms = (self.config.speed_window_secs * 1000.0) as i64;
        while let Some(&(t, _)) = self.window.front() {
            if fix.timestamp - t > window_ms {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Forget the segment anchor; the next point starts a fresh segment.
    pub fn reanchor(&mut self) {
        self.anchor = None;
        self.window.clear();
    }

    /// Rolling speed over the samples no older than the window at `now_ms`, km/h.
    /// Zero once fewer than two samples remain, so a runner who stops reads 0.
    pub fn speed_kmh(&self, now_ms: i64) -> f64 {
        let window_ms = (self.config.speed_window_secs * 1000.0) as i64;
        let recent: Vec<&(i64, GeoPoint)> = self
            .window
            .iter()
            .filter(|(t, _)| now_ms - *t <= window_ms)
            .collect();
        let (Some(&&(first_t, _)), Some(&&(last_t, _))) = (recent.first(), recent.last()) else {
            return 0.0;
        };
        if recent.len() < 2 {
            return 0.0;
        }
        let window_secs = (last_t - first_t) as f64 / 1000.0;
        if window_secs <= 0.0 {
            return 0.0;
        }

        let km: f64 = recent
            .iter()
            .zip(recent.iter().skip(1))
            .map(|((_, a), (_, b))| haversine_km(a, b))
            .sum();
        km / window_secs * 3600.0
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_km
    }

    pub fn route(&self) -> &[GeoPoint] {
        &self.route
    }

    pub fn last_point(&self) -> Option<&GeoPoint> {
        self.route.last()
    }

    pub fn spike_count(&self) -> u64 {
        self.spike_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::METERS_PER_DEG_LAT;
    use approx::assert_relative_eq;

    const T0: i64 = 1_700_000_000_000;

    fn integrator() -> TrackIntegrator {
        TrackIntegrator::new(IntegratorConfig::default(), 5.0)
    }

    fn point_north(meters: f64) -> GeoPoint {
        GeoPoint::new(37.5 + meters / METERS_PER_DEG_LAT, 127.0)
    }

    fn fix_for(p: GeoPoint, t: i64, accuracy: f64) -> RawFix {
        RawFix::new(p.latitude, p.longitude, t).with_accuracy(accuracy)
    }

    #[test]
    fn test_allowance_bounds() {
        let config = IntegratorConfig::default();
        // accuracy-limited: 0.1 · 5
        assert_relative_eq!(noise_allowance_m(20.0, Some(5.0), Some(5.0), 5.0, &config), 0.5, epsilon = 1e-12);
        // cap-limited
        assert_relative_eq!(noise_allowance_m(20.0, Some(40.0), Some(40.0), 5.0, &config), 1.5, epsilon = 1e-12);
        // segment-limited: 0.3 · 2
        assert_relative_eq!(noise_allowance_m(2.0, Some(30.0), Some(30.0), 5.0, &config), 0.6, epsilon = 1e-12);
        // average of both, then one-sided fallback
        assert_relative_eq!(noise_allowance_m(50.0, Some(4.0), Some(8.0), 5.0, &config), 0.6, epsilon = 1e-12);
        assert_relative_eq!(noise_allowance_m(50.0, None, Some(8.0), 5.0, &config), 0.8, epsilon = 1e-12);
        assert_relative_eq!(noise_allowance_m(50.0, None, None, 5.0, &config), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_allowance_never_exceeds_thirty_percent() {
        let config = IntegratorConfig::default();
        for seg in [0.0, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 100.0] {
            for acc in [0.0, 3.0, 10.0, 65.0] {
                let allowance = noise_allowance_m(seg, Some(acc), Some(acc), 5.0, &config);
                let added = (seg - allowance).max(0.0);
                assert!(added <= seg);
                assert!(added >= seg * 0.7 - 1e-12);
            }
        }
    }

    #[test]
    fn test_first_point_anchors() {
        let mut track = integrator();
        let outcome = track.push(point_north(0.0), &fix_for(point_north(0.0), T0, 5.0));

        assert_eq!(outcome, SegmentOutcome::Anchored);
        assert_eq!(track.route().len(), 1);
        assert_eq!(track.distance_km(), 0.0);
    }

    #[test]
    fn test_segment_adds_distance_minus_allowance() {
        let mut track = integrator();
        track.push(point_north(0.0), &fix_for(point_north(0.0), T0, 5.0));
        let outcome = track.push(point_north(10.0), &fix_for(point_north(10.0), T0 + 5_000, 5.0));

        let SegmentOutcome::Advanced { segment_m, added_m } = outcome else {
            panic!("expected an advancing segment, got {outcome:?}");
        };
        assert_relative_eq!(added_m, segment_m - 0.5, epsilon = 1e-9);
        assert_relative_eq!(track.distance_km(), added_m / 1000.0, epsilon = 1e-12);
    }

    #[test]
    fn test_spike_keeps_route_point_but_not_distance() {
        let mut track = integrator();
        track.push(point_north(0.0), &fix_for(point_north(0.0), T0, 5.0));
        track.push(point_north(5.0), &fix_for(point_north(5.0), T0 + 2_000, 5.0));
        let before = track.distance_km();

        // 100 m in one second
        let outcome = track.push(point_north(105.0), &fix_for(point_north(105.0), T0 + 3_000, 5.0));

        assert!(matches!(outcome, SegmentOutcome::Spike { implied_mps } if implied_mps > 6.5));
        assert_eq!(track.distance_km(), before);
        assert_eq!(track.route().len(), 3);
        assert_eq!(track.spike_count(), 1);

        // Next sample is measured from the last good anchor
        let outcome = track.push(point_north(10.0), &fix_for(point_north(10.0), T0 + 4_000, 5.0));
        assert!(matches!(outcome, SegmentOutcome::Advanced { segment_m, .. } if (segment_m - 5.0).abs() < 0.05));
    }

    #[test]
    fn test_speed_window() {
        let mut track = integrator();
        assert_eq!(track.speed_kmh(T0), 0.0);

        // 3 m/s for 10 s, one sample per second
        for i in 0..=10 {
            let p = point_north(3.0 * i as f64);
            track.push(p, &fix_for(p, T0 + i * 1000, 5.0));
        }
        // haversine scale is ~0.6% above the projection scale
        assert_relative_eq!(track.speed_kmh(T0 + 10_000), 10.8, epsilon = 0.1);
    }

    #[test]
    fn test_speed_window_drops_old_samples() {
        let mut track = integrator();
        track.push(point_north(0.0), &fix_for(point_north(0.0), T0, 5.0));
        track.push(point_north(4.0), &fix_for(point_north(4.0), T0 + 1000, 5.0));
        assert!(track.speed_kmh(T0 + 1000) > 0.0);

        // A sample 6 s later evicts everything older than the 5 s window
        track.push(point_north(8.0), &fix_for(point_north(8.0), T0 + 7000, 5.0));
        assert_eq!(track.speed_kmh(T0 + 7000), 0.0);
    }

    #[test]
    fn test_speed_decays_when_samples_stop() {
        let mut track = integrator();
        for i in 0..=10 {
            let p = point_north(3.0 * i as f64);
            track.push(p, &fix_for(p, T0 + i * 1000, 5.0));
        }
        assert!(track.speed_kmh(T0 + 10_000) > 10.0);

        // samples age out with wall-clock time, no new push needed
        assert!(track.speed_kmh(T0 + 13_000) > 0.0);
        assert_eq!(track.speed_kmh(T0 + 14_500), 0.0);
        assert_eq!(track.speed_kmh(T0 + 60_000), 0.0);
    }

    #[test]
    fn test_reanchor_skips_gap() {
        let mut track = integrator();
        track.push(point_north(0.0), &fix_for(point_north(0.0), T0, 5.0));
        track.push(point_north(10.0), &fix_for(point_north(10.0), T0 + 5000, 5.0));
        let before = track.distance_km();

        track.reanchor();
        let outcome = track.push(point_north(500.0), &fix_for(point_north(500.0), T0 + 600_000, 5.0));

        assert_eq!(outcome, SegmentOutcome::Anchored);
        assert_eq!(track.distance_km(), before);
        assert_eq!(track.route().len(), 3);
    }
}
