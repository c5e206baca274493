//! GPS run tracking core: fix admission, Kalman smoothing, distance
//! integration, pause-aware timing, and throttled progress sync.

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod filters;
pub mod geo;
pub mod metrics;
pub mod runtime;
pub mod session;
pub mod sync;
pub mod track;
pub mod types;

pub use admission::{AdmissionFilter, AdmissionVerdict, RejectReason};
pub use clock::{Clock, ManualClock, SessionClock, SystemClock};
pub use config::TrackerConfig;
pub use error::{RemoteError, TrackerError, TrackerResult};
pub use export::{GpxTrack, RunSummary};
pub use runtime::{spawn_tracker, LocationProvider, TrackerHandle};
pub use session::{
    FixOutcome, FixStats, LocationPermission, RunState, RunTracker, SyncRequest, TrackerSnapshot,
};
pub use sync::{HttpProgressRemote, OfflineRemote, ProgressPayload, ProgressRemote};
pub use types::{GeoPoint, RawFix, ReplayEvent};
