//! Best-effort progress synchronization with the remote run service.
//!
//! # Throttling
//! - A sync is due once 5 s have passed or 50 m were added since the last success
//! - At most one request is in flight
//! - Failures leave the throttle state untouched, so the next due check retries
//!   with fresher totals
//!
//! # Error Handling
//! - Every remote failure is a [`RemoteError`], logged and dropped at this boundary
//! - A failed session start falls back to a local `local_<epoch_ms>` id

use crate::config::SyncConfig;
use crate::error::RemoteError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub client_session_id: String,
    pub run_type: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// 1-based position of the point in the route
    pub sequence: u64,
    /// Fix capture time, epoch ms
    pub t: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub session_id: String,
    pub distance_meters: u64,
    pub duration_seconds: u64,
    pub average_pace_seconds: Option<u64>,
    pub calories: u32,
    pub current_point: ProgressPoint,
}

/// Remote collaborator receiving run progress
#[async_trait]
pub trait ProgressRemote: Send + Sync {
    /// Register a run and return the server-side session id
    async fn start_session(&self, request: &StartSessionRequest) -> Result<String, RemoteError>;

    async fn push_progress(&self, payload: &ProgressPayload) -> Result<(), RemoteError>;
}

/// Remote that is never reachable; runs stay purely local.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineRemote;

#[async_trait]
impl ProgressRemote for OfflineRemote {
    async fn start_session(&self, _request: &StartSessionRequest) -> Result<String, RemoteError> {
        Err(RemoteError::Offline)
    }

    async fn push_progress(&self, _payload: &ProgressPayload) -> Result<(), RemoteError> {
        Err(RemoteError::Offline)
    }
}

/// JSON-over-HTTP progress client
///
/// - `POST {base_url}/runs/sessions` with [`StartSessionRequest`], answers [`StartSessionResponse`]
/// - `POST {base_url}/runs/sessions/{id}/progress` with [`ProgressPayload`]
pub struct HttpProgressRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProgressRemote {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("run_tracker_rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        HttpProgressRemote {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn sessions_url(&self) -> String {
        format!("{}/runs/sessions", self.base_url)
    }

    fn progress_url(&self, session_id: &str) -> String {
        format!("{}/runs/sessions/{}/progress", self.base_url, session_id)
    }
}

#[async_trait]
impl ProgressRemote for HttpProgressRemote {
    async fn start_session(&self, request: &StartSessionRequest) -> Result<String, RemoteError> {
        let response = self.client.post(self.sessions_url()).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Http(status.as_u16()));
        }
        let body: StartSessionResponse = response.json().await?;
        Ok(body.session_id)
    }

    async fn push_progress(&self, payload: &ProgressPayload) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.progress_url(&payload.session_id))
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Http(status.as_u16()));
        }
        Ok(())
    }
}

/// Session id used when the remote start call fails
pub fn fallback_session_id(now_ms: i64) -> String {
    format!("local_{}", now_ms)
}

/// Server id on success, logged local fallback otherwise.
pub fn resolve_session_id(result: Result<String, RemoteError>, now_ms: i64) -> String {
    match result {
        Ok(id) => id,
        Err(e) => {
            let fallback = fallback_session_id(now_ms);
            log::warn!("Remote session start failed ({}), using {}", e, fallback);
            fallback
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome {
    Synced,
    /// Ignorable: retried at the next due check
    Skipped(RemoteError),
}

/// Decides when accumulated progress is worth pushing
#[derive(Clone, Debug)]
pub struct SyncThrottle {
    interval_ms: i64,
    distance_km: f64,
    last_sync_ms: i64,
    last_sync_km: f64,
    in_flight: bool,
    stats: SyncStats,
}

impl SyncThrottle {
    pub fn new(config: &SyncConfig, start_ms: i64) -> Self {
        Self {
            interval_ms: config.interval_ms,
            distance_km: config.distance_km,
            last_sync_ms: start_ms,
            last_sync_km: 0.0,
            in_flight: false,
            stats: SyncStats::default(),
        }
    }

    pub fn is_due(&self, now_ms: i64, distance_km: f64) -> bool {
        if self.in_flight {
            return false;
        }
        now_ms - self.last_sync_ms >= self.interval_ms
            || distance_km - self.last_sync_km >= self.distance_km
    }

    /// Mark a request as sent
    pub fn begin(&mut self) {
        self.in_flight = true;
        self.stats.attempts += 1;
    }

    /// Record the result of the in-flight request for totals captured at `synced_at_ms`.
    pub fn complete(
        &mut self,
        result: Result<(), RemoteError>,
        synced_at_ms: i64,
        synced_km: f64,
    ) -> SyncOutcome {
        self.in_flight = false;
        match result {
            Ok(()) => {
                self.last_sync_ms = synced_at_ms;
                self.last_sync_km = synced_km;
                self.stats.successes += 1;
                SyncOutcome::Synced
            }
            Err(e) => {
                self.stats.failures += 1;
                log::warn!("Progress sync skipped: {}", e);
                SyncOutcome::Skipped(e)
            }
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_sync_ms(&self) -> i64 {
        self.last_sync_ms
    }

    pub fn last_sync_km(&self) -> f64 {
        self.last_sync_km
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }
}
