use crate::metrics::{avg_pace_sec_per_km, calories_kcal, pace_label};
use crate::session::{FixStats, RunSession};
use crate::sync::SyncStats;
use crate::types::GeoPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Finished run, as written by `--summary`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub session_id: Option<String>,
    pub client_session_id: String,
    pub started_at_ms: i64,
    pub stopped_at_ms: i64,
    pub distance_km: f64,
    pub elapsed_secs: u64,
    pub paused_ms: i64,
    pub avg_pace_sec_per_km: Option<f64>,
    pub pace_label: String,
    pub calories: u32,
    pub route: Vec<GeoPoint>,
    pub fixes: FixStats,
    pub sync: SyncStats,
}

impl RunSummary {
    pub fn from_session(session: &RunSession, stopped_at_ms: i64, weight_kg: f64) -> Self {
        let distance_km = session.distance_km();
        let elapsed_secs = session.elapsed_secs();
        let pace = avg_pace_sec_per_km(distance_km, elapsed_secs as f64);

        RunSummary {
            session_id: session.session_id().map(str::to_string),
            client_session_id: session.client_session_id().to_string(),
            started_at_ms: session.started_at_ms(),
            stopped_at_ms,
            distance_km,
            elapsed_secs,
            paused_ms: session.paused_ms(),
            avg_pace_sec_per_km: pace,
            pace_label: pace_label(pace),
            calories: calories_kcal(distance_km, weight_kg),
            route: session.route().to_vec(),
            fixes: session.fix_stats(),
            sync: session.sync_stats(),
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> crate::error::TrackerResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn to_gpx(&self) -> GpxTrack {
        let id = self
            .session_id
            .as_deref()
            .unwrap_or(&self.client_session_id);
        GpxTrack {
            name: format!("Run {}", id),
            description: format!(
                "{:.2} km in {}s, pace {}",
                self.distance_km, self.elapsed_secs, self.pace_label
            ),
            start_time: rfc3339_from_ms(self.started_at_ms),
            track_points: self.route.clone(),
        }
    }
}

fn rfc3339_from_ms(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

/// GPX track format for mapping applications
#[derive(Debug, Clone, Serialize)]
pub struct GpxTrack {
    pub name: String,
    pub description: String,
    pub start_time: String,
    pub track_points: Vec<GeoPoint>,
}

impl GpxTrack {
    /// Generate GPX document XML string
    pub fn to_gpx_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<gpx version=\"1.1\" creator=\"run_tracker_rs\">\n");
        xml.push_str("  <metadata>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape_xml(&self.name)));
        xml.push_str(&format!("    <desc>{}</desc>\n", escape_xml(&self.description)));
        if !self.start_time.is_empty() {
            xml.push_str(&format!("    <time>{}</time>\n", self.start_time));
        }
        xml.push_str("  </metadata>\n");
        xml.push_str("  <trk>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape_xml(&self.name)));
        xml.push_str("    <type>running</type>\n");
        xml.push_str("    <trkseg>\n");

        for point in &self.track_points {
            xml.push_str(&format!(
                "      <trkpt lat=\"{:.7}\" lon=\"{:.7}\"></trkpt>\n",
                point.latitude, point.longitude
            ));
        }

        xml.push_str("    </trkseg>\n");
        xml.push_str("  </trk>\n");
        xml.push_str("</gpx>\n");

        xml
    }

    pub fn write(&self, path: impl AsRef<Path>) -> crate::error::TrackerResult<()> {
        std::fs::write(path, self.to_gpx_xml())?;
        Ok(())
    }
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        RunSummary {
            session_id: Some("srv-9".to_string()),
            client_session_id: "run_1700000000000".to_string(),
            started_at_ms: 1_700_000_000_000,
            stopped_at_ms: 1_700_000_400_000,
            distance_km: 1.0,
            elapsed_secs: 360,
            paused_ms: 40_000,
            avg_pace_sec_per_km: Some(360.0),
            pace_label: "6:00".to_string(),
            calories: 70,
            route: vec![GeoPoint::new(37.5, 127.0), GeoPoint::new(37.509, 127.0)],
            fixes: FixStats::default(),
            sync: SyncStats::default(),
        }
    }

    #[test]
    fn test_summary_json_serialization() {
        let json = summary().to_json().unwrap();
        assert!(json.contains("srv-9"));
        assert!(json.contains("\"pace_label\": \"6:00\""));

        let back: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary());
    }

    #[test]
    fn test_gpx_generation() {
        let gpx_xml = summary().to_gpx().to_gpx_xml();

        assert!(gpx_xml.starts_with("<?xml"));
        assert!(gpx_xml.contains("<name>Run srv-9</name>"));
        assert!(gpx_xml.contains("<time>2023-11-14T22:13:20+00:00</time>"));
        assert!(gpx_xml.contains("lat=\"37.5090000\" lon=\"127.0000000\""));
        assert_eq!(gpx_xml.matches("<trkpt").count(), 2);
        assert!(gpx_xml.trim_end().ends_with("</gpx>"));
    }

    #[test]
    fn test_gpx_falls_back_to_client_id_and_escapes() {
        let mut s = summary();
        s.session_id = None;
        s.client_session_id = "a<b>&c".to_string();
        let gpx_xml = s.to_gpx().to_gpx_xml();
        assert!(gpx_xml.contains("<name>Run a&lt;b&gt;&amp;c</name>"));
    }
}
