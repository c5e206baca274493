//! Geodesy helpers: great-circle distance and the local meter projection
//! the position filter runs in.

use crate::types::{GeoPoint, PosVec2};

const EARTH_RADIUS_KM: f64 = 6_371.0;
/// Meters per degree of latitude (equirectangular approximation)
pub const METERS_PER_DEG_LAT: f64 = 110_540.0;
/// Meters per degree of longitude at the equator
pub const METERS_PER_DEG_LON_EQUATOR: f64 = 111_320.0;

/// Haversine great-circle distance in kilometers.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_KM * c
}

/// Flat-earth frame anchored at `origin`. X grows east, Y grows north, both in meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalFrame {
    origin: GeoPoint,
    meters_per_deg_lon: f64,
}

impl LocalFrame {
    pub fn new(origin: GeoPoint) -> Self {
        Self {
            origin,
            meters_per_deg_lon: METERS_PER_DEG_LON_EQUATOR * origin.latitude.to_radians().cos(),
        }
    }

    pub fn origin(&self) -> GeoPoint {
        self.origin
    }

    /// Degrees → local meters
    pub fn project(&self, point: &GeoPoint) -> PosVec2 {
        PosVec2::new(
            (point.longitude - self.origin.longitude) * self.meters_per_deg_lon,
            (point.latitude - self.origin.latitude) * METERS_PER_DEG_LAT,
        )
    }

    /// Local meters → degrees
    pub fn unproject(&self, local: &PosVec2) -> GeoPoint {
        // cos(lat0) vanishes only at the poles
        let lon_scale = if self.meters_per_deg_lon.abs() > f64::EPSILON {
            self.meters_per_deg_lon
        } else {
            f64::EPSILON
        };
        GeoPoint::new(
            self.origin.latitude + local.y / METERS_PER_DEG_LAT,
            self.origin.longitude + local.x / lon_scale,
        )
    }
}

/// Planar distance in meters between two nearby points.
pub fn planar_distance_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    LocalFrame::new(*a).project(b).norm()
}
