//! Derived run metrics shown to the runner: pace and calorie estimate.

/// Below this distance the average pace is too noisy to show
pub const MIN_PACE_DISTANCE_KM: f64 = 0.05;

/// Shown when the pace is undefined
pub const PACE_PLACEHOLDER: &str = "--:--";

/// Average pace in seconds per kilometer, `None` under [`MIN_PACE_DISTANCE_KM`].
pub fn avg_pace_sec_per_km(distance_km: f64, elapsed_secs: f64) -> Option<f64> {
    if !distance_km.is_finite() || distance_km < MIN_PACE_DISTANCE_KM {
        return None;
    }
    Some(elapsed_secs / distance_km)
}

/// Format seconds as `M:SS`, rounding to the nearest second first so 59.6 becomes `1:00`.
pub fn fmt_mmss(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return PACE_PLACEHOLDER.to_string();
    }
    let total = seconds.round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

pub fn pace_label(pace_sec_per_km: Option<f64>) -> String {
    pace_sec_per_km.map_or_else(|| PACE_PLACEHOLDER.to_string(), fmt_mmss)
}

/// Linear calorie estimate: one kcal per kilogram per kilometer.
pub fn calories_kcal(distance_km: f64, weight_kg: f64) -> u32 {
    (distance_km * weight_kg).round().max(0.0) as u32
}
