use crate::admission::{AdmissionFilter, AdmissionVerdict, RejectReason};
use crate::clock::{Clock, SessionClock};
use crate::config::TrackerConfig;
use crate::error::{RemoteError, TrackerError, TrackerResult};
use crate::export::RunSummary;
use crate::filters::PositionFilter;
use crate::metrics::{avg_pace_sec_per_km, calories_kcal, pace_label};
use crate::sync::{
    resolve_session_id, ProgressPayload, ProgressPoint, StartSessionRequest, SyncOutcome,
    SyncStats, SyncThrottle,
};
use crate::track::{SegmentOutcome, TrackIntegrator};
use crate::types::{GeoPoint, RawFix};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Run state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// No run started yet
    Idle,
    /// Tracking fixes and ticking the clock
    Running,
    /// Run alive, fixes ignored, clock frozen
    Paused,
    /// Last run finished; a new one may start
    Stopped,
}

/// Per-run fix counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixStats {
    pub received: u64,
    pub accepted: u64,
    pub rejected_poor_accuracy: u64,
    pub rejected_jitter: u64,
    pub rejected_stationary: u64,
    pub rejected_out_of_order: u64,
    pub spikes: u64,
}

impl FixStats {
    fn record_rejection(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::PoorAccuracy => self.rejected_poor_accuracy += 1,
            RejectReason::Jitter => self.rejected_jitter += 1,
            RejectReason::StationaryDrift => self.rejected_stationary += 1,
            RejectReason::OutOfOrder => self.rejected_out_of_order += 1,
        }
    }

    pub fn rejected(&self) -> u64 {
        self.rejected_poor_accuracy
            + self.rejected_jitter
            + self.rejected_stationary
            + self.rejected_out_of_order
    }
}

/// Issued by `start`; the caller registers the run remotely and reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct StartTicket {
    pub run_id: u64,
    pub request: StartSessionRequest,
}

/// A progress push the caller should send, then report via `complete_sync`.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub run_id: u64,
    pub payload: ProgressPayload,
    pub captured_at_ms: i64,
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FixOutcome {
    /// No active, unpaused run
    Ignored,
    Rejected(RejectReason),
    Accepted {
        point: GeoPoint,
        segment: SegmentOutcome,
        sync: Option<SyncRequest>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationPermission {
    Granted,
    Denied,
}

/// What the UI reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub route: Vec<GeoPoint>,
    pub distance_km: f64,
    pub elapsed_secs: u64,
    pub pace_label: String,
    pub calories: u32,
    pub speed_kmh: f64,
    pub is_running: bool,
    pub is_paused: bool,
    pub is_initializing: bool,
    pub session_id: Option<String>,
}

impl TrackerSnapshot {
    pub fn idle() -> Self {
        Self {
            route: Vec::new(),
            distance_km: 0.0,
            elapsed_secs: 0,
            pace_label: pace_label(None),
            calories: 0,
            speed_kmh: 0.0,
            is_running: false,
            is_paused: false,
            is_initializing: false,
            session_id: None,
        }
    }
}

/// Everything owned by one run; created on start, dropped on stop.
pub struct RunSession {
    run_id: u64,
    client_session_id: String,
    /// Write-once: remote id or local fallback
    session_id: Option<String>,
    admission: AdmissionFilter,
    filter: PositionFilter,
    track: TrackIntegrator,
    clock: SessionClock,
    sync: SyncThrottle,
    stats: FixStats,
    reanchor_pending: bool,
}

impl RunSession {
    fn new(run_id: u64, config: &TrackerConfig, now_ms: i64) -> Self {
        Self {
            run_id,
            client_session_id: format!("run_{}", now_ms),
            session_id: None,
            admission: AdmissionFilter::new(config.admission.clone()),
            filter: PositionFilter::new(config.kalman.clone()),
            track: TrackIntegrator::new(
                config.integrator.clone(),
                config.kalman.base_measurement_noise_m,
            ),
            clock: SessionClock::start(now_ms),
            sync: SyncThrottle::new(&config.sync, now_ms),
            stats: FixStats::default(),
            reanchor_pending: false,
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn client_session_id(&self) -> &str {
        &self.client_session_id
    }

    pub fn started_at_ms(&self) -> i64 {
        self.clock.start_epoch_ms()
    }

    pub fn paused_ms(&self) -> i64 {
        self.clock.paused_ms()
    }

    pub fn route(&self) -> &[GeoPoint] {
        self.track.route()
    }

    pub fn distance_km(&self) -> f64 {
        self.track.distance_km()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.clock.elapsed_secs()
    }

    pub fn fix_stats(&self) -> FixStats {
        self.stats
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }
}

/// Owns at most one active run and drives the pipeline for it:
/// admission → position filter → track integrator → sync throttle.
pub struct RunTracker {
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    state: RunState,
    session: Option<RunSession>,
    next_run_id: u64,
}

impl RunTracker {
    pub fn new(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: RunState::Idle,
            session: None,
            next_run_id: 1,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn session(&self) -> Option<&RunSession> {
        self.session.as_ref()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Idle/Stopped → Running
    pub fn start(&mut self, permission: LocationPermission) -> TrackerResult<StartTicket> {
        match self.state {
            RunState::Running | RunState::Paused => return Err(TrackerError::AlreadyRunning),
            RunState::Idle | RunState::Stopped => {}
        }
        if permission == LocationPermission::Denied {
            log::warn!("Run start aborted: location permission denied");
            return Err(TrackerError::PermissionDenied);
        }

        let now = self.clock.now_ms();
        let run_id = self.next_run_id;
        self.next_run_id += 1;

        let session = RunSession::new(run_id, &self.config, now);
        let ticket = StartTicket {
            run_id,
            request: StartSessionRequest {
                client_session_id: session.client_session_id.clone(),
                run_type: self.config.sync.run_type.clone(),
            },
        };
        log::info!("Run {} started ({})", run_id, session.client_session_id);

        self.session = Some(session);
        self.state = RunState::Running;
        Ok(ticket)
    }

    /// Record the remote start result for `run_id`. Returns the id in effect, if the run
    /// is still active. The id is write-once.
    pub fn assign_session_id(
        &mut self,
        run_id: u64,
        result: Result<String, RemoteError>,
    ) -> Option<String> {
        let now = self.clock.now_ms();
        let session = self.session.as_mut().filter(|s| s.run_id == run_id)?;
        if let Some(existing) = &session.session_id {
            log::warn!("Session id already assigned ({}), ignoring", existing);
            return Some(existing.clone());
        }
        let id = resolve_session_id(result, now);
        log::info!("Run {} bound to session {}", run_id, id);
        session.session_id = Some(id.clone());
        Some(id)
    }

    /// Running → Paused
    pub fn pause(&mut self) -> TrackerResult<()> {
        match self.state {
            RunState::Running => {
                let now = self.clock.now_ms();
                let session = self.active_session_mut()?;
                session.clock.pause(now);
                self.state = RunState::Paused;
                log::info!("Run paused");
                Ok(())
            }
            RunState::Paused => Err(TrackerError::InvalidState("Already paused".to_string())),
            RunState::Idle | RunState::Stopped => Err(TrackerError::NotRunning),
        }
    }

    /// Paused → Running; the next accepted fix starts a fresh segment.
    pub fn resume(&mut self) -> TrackerResult<()> {
        match self.state {
            RunState::Paused => {
                let now = self.clock.now_ms();
                let session = self.active_session_mut()?;
                session.clock.resume(now);
                session.reanchor_pending = true;
                self.state = RunState::Running;
                log::info!("Run resumed");
                Ok(())
            }
            RunState::Running => Err(TrackerError::InvalidState("Not paused".to_string())),
            RunState::Idle | RunState::Stopped => Err(TrackerError::NotRunning),
        }
    }

    /// Running/Paused → Stopped. Discards all run state and returns its summary.
    pub fn stop(&mut self) -> TrackerResult<RunSummary> {
        match self.state {
            RunState::Running | RunState::Paused => {}
            RunState::Idle | RunState::Stopped => return Err(TrackerError::NotRunning),
        }
        let now = self.clock.now_ms();
        let mut session = self.session.take().ok_or(TrackerError::NotRunning)?;
        if self.state == RunState::Running {
            session.clock.tick(now);
        }
        self.state = RunState::Stopped;

        let summary = RunSummary::from_session(&session, now, self.config.athlete.weight_kg);
        log::info!(
            "Run {} stopped: {:.3} km in {}s",
            session.run_id,
            summary.distance_km,
            summary.elapsed_secs
        );
        Ok(summary)
    }

    /// Periodic clock tick. Returns the published elapsed seconds while running.
    pub fn tick(&mut self) -> Option<u64> {
        if self.state != RunState::Running {
            return None;
        }
        let now = self.clock.now_ms();
        self.session.as_mut().map(|s| s.clock.tick(now))
    }

    /// Process one raw fix through the pipeline.
    pub fn handle_fix(&mut self, fix: &RawFix) -> FixOutcome {
        if self.state != RunState::Running {
            return FixOutcome::Ignored;
        }
        let now = self.clock.now_ms();
        let weight_kg = self.config.athlete.weight_kg;
        let Some(session) = self.session.as_mut() else {
            return FixOutcome::Ignored;
        };

        session.stats.received += 1;
        if let AdmissionVerdict::Rejected(reason) = session.admission.check(fix) {
            session.stats.record_rejection(reason);
            if reason == RejectReason::OutOfOrder {
                log::warn!("Dropping out-of-order fix at {}", fix.timestamp);
            } else {
                log::debug!("Fix rejected: {:?}", reason);
            }
            return FixOutcome::Rejected(reason);
        }
        session.stats.accepted += 1;

        if session.reanchor_pending {
            session.filter.reseed();
            session.track.reanchor();
            session.reanchor_pending = false;
        }

        let point = session.filter.filter(fix);
        let segment = session.track.push(point, fix);
        if matches!(segment, SegmentOutcome::Spike { .. }) {
            session.stats.spikes += 1;
        }
        let sync = Self::maybe_sync(session, point, fix, now, weight_kg);
        FixOutcome::Accepted {
            point,
            segment,
            sync,
        }
    }

    fn maybe_sync(
        session: &mut RunSession,
        point: GeoPoint,
        fix: &RawFix,
        now: i64,
        weight_kg: f64,
    ) -> Option<SyncRequest> {
        let session_id = session.session_id.clone()?;
        let distance_km = session.track.distance_km();
        if !session.sync.is_due(now, distance_km) {
            return None;
        }

        let elapsed = session.clock.elapsed_at(now);
        let pace = avg_pace_sec_per_km(distance_km, elapsed as f64);
        let payload = ProgressPayload {
            session_id,
            distance_meters: (distance_km * 1000.0).round() as u64,
            duration_seconds: elapsed,
            average_pace_seconds: pace.map(|p| p.round() as u64),
            calories: calories_kcal(distance_km, weight_kg),
            current_point: ProgressPoint {
                latitude: point.latitude,
                longitude: point.longitude,
                // 1-based index of this point in the route
                sequence: session.track.route().len() as u64,
                t: fix.timestamp,
            },
        };
        session.sync.begin();
        Some(SyncRequest {
            run_id: session.run_id,
            payload,
            captured_at_ms: now,
            distance_km,
        })
    }

    /// Report the result of a sync request. Stale results from a finished run are dropped.
    pub fn complete_sync(
        &mut self,
        request: &SyncRequest,
        result: Result<(), RemoteError>,
    ) -> Option<SyncOutcome> {
        let session = self
            .session
            .as_mut()
            .filter(|s| s.run_id == request.run_id)?;
        Some(
            session
                .sync
                .complete(result, request.captured_at_ms, request.distance_km),
        )
    }

    fn active_session_mut(&mut self) -> TrackerResult<&mut RunSession> {
        self.session.as_mut().ok_or(TrackerError::NotRunning)
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let Some(session) = &self.session else {
            return TrackerSnapshot::idle();
        };
        let distance_km = session.distance_km();
        let elapsed_secs = session.elapsed_secs();
        let is_running = self.state == RunState::Running;
        let now = self.clock.now_ms();
        TrackerSnapshot {
            route: session.route().to_vec(),
            distance_km,
            elapsed_secs,
            pace_label: pace_label(avg_pace_sec_per_km(distance_km, elapsed_secs as f64)),
            calories: calories_kcal(distance_km, self.config.athlete.weight_kg),
            speed_kmh: if is_running { session.track.speed_kmh(now) } else { 0.0 },
            is_running,
            is_paused: self.state == RunState::Paused,
            is_initializing: self.state != RunState::Stopped && session.route().is_empty(),
            session_id: session.session_id.clone(),
        }
    }
}
