//! Async driver around [`RunTracker`].
//!
//! One task owns the tracker and serializes everything that touches it:
//! UI commands, location fixes, the 1 s clock tick, and completions of remote
//! calls. Remote calls run on their own tasks and report back through a
//! channel, so a slow network never stalls fix processing.

use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::error::{RemoteError, TrackerError, TrackerResult};
use crate::export::RunSummary;
use crate::session::{FixOutcome, LocationPermission, RunState, RunTracker, SyncRequest, TrackerSnapshot};
use crate::sync::ProgressRemote;
use crate::types::RawFix;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Platform location service
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_permission(&self) -> LocationPermission;

    /// Start delivering fixes
    async fn subscribe(&self) -> TrackerResult<mpsc::Receiver<RawFix>>;

    /// Keep delivering fixes while backgrounded. Best effort.
    async fn enable_background(&self) -> TrackerResult<()>;

    async fn unsubscribe(&self);
}

enum Command {
    Start(oneshot::Sender<TrackerResult<()>>),
    Pause(oneshot::Sender<TrackerResult<()>>),
    Resume(oneshot::Sender<TrackerResult<()>>),
    Stop(oneshot::Sender<TrackerResult<RunSummary>>),
    Shutdown,
}

enum Completion {
    SessionStarted {
        run_id: u64,
        result: Result<String, RemoteError>,
    },
    Synced {
        request: SyncRequest,
        result: Result<(), RemoteError>,
    },
}

/// Control surface for a spawned tracker task
pub struct TrackerHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<TrackerSnapshot>,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<TrackerResult<T>>) -> Command,
    ) -> TrackerResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| TrackerError::InvalidState("Tracker task stopped".to_string()))?;
        rx.await
            .map_err(|_| TrackerError::InvalidState("Tracker task stopped".to_string()))?
    }

    /// Request permission, subscribe to fixes and begin a run
    pub async fn start(&self) -> TrackerResult<()> {
        self.request(Command::Start).await
    }

    pub async fn pause(&self) -> TrackerResult<()> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> TrackerResult<()> {
        self.request(Command::Resume).await
    }

    pub async fn stop(&self) -> TrackerResult<RunSummary> {
        self.request(Command::Stop).await
    }

    /// Latest published state
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.snapshots.clone()
    }

    /// Stop any active run and wait for the task to exit
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            log::warn!("Tracker task ended abnormally: {}", e);
        }
    }
}

/// Spawn the tracker task on the current tokio runtime.
pub fn spawn_tracker(
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    provider: Arc<dyn LocationProvider>,
    remote: Arc<dyn ProgressRemote>,
) -> TrackerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (snap_tx, snap_rx) = watch::channel(TrackerSnapshot::idle());

    let driver = Driver {
        tracker: RunTracker::new(config, clock),
        provider,
        remote,
        snapshots: snap_tx,
        initializing: false,
    };
    let task = tokio::spawn(driver.run(cmd_rx));

    TrackerHandle {
        commands: cmd_tx,
        snapshots: snap_rx,
        task,
    }
}

fn tick_interval() -> Interval {
    let mut interval = tokio::time::interval(TICK_PERIOD);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn next_fix(fixes: &mut Option<mpsc::Receiver<RawFix>>) -> Option<RawFix> {
    match fixes {
        Some(rx) => rx.recv().await,
        None => futures::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}

struct Driver {
    tracker: RunTracker,
    provider: Arc<dyn LocationProvider>,
    remote: Arc<dyn ProgressRemote>,
    snapshots: watch::Sender<TrackerSnapshot>,
    /// Waiting on permission or subscription
    initializing: bool,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let (done_tx, mut done_rx) = mpsc::channel::<Completion>(32);
        let mut fixes: Option<mpsc::Receiver<RawFix>> = None;
        let mut ticker: Option<Interval> = None;

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        self.shutdown(&mut fixes, &mut ticker).await;
                        break;
                    };
                    // publish before replying so callers observe the new state
                    match cmd {
                        Command::Start(reply) => {
                            let result = self.start(&done_tx, &mut fixes, &mut ticker).await;
                            self.publish();
                            let _ = reply.send(result);
                        }
                        Command::Pause(reply) => {
                            let result = self.tracker.pause();
                            if result.is_ok() {
                                ticker = None;
                            }
                            self.publish();
                            let _ = reply.send(result);
                        }
                        Command::Resume(reply) => {
                            let result = self.tracker.resume();
                            if result.is_ok() {
                                ticker = Some(tick_interval());
                            }
                            self.publish();
                            let _ = reply.send(result);
                        }
                        Command::Stop(reply) => {
                            let result = self.tracker.stop();
                            if result.is_ok() {
                                self.release(&mut fixes, &mut ticker).await;
                            }
                            self.publish();
                            let _ = reply.send(result);
                        }
                        Command::Shutdown => {
                            self.shutdown(&mut fixes, &mut ticker).await;
                            break;
                        }
                    }
                }
                fix = next_fix(&mut fixes) => {
                    match fix {
                        Some(fix) => self.on_fix(&fix, &done_tx),
                        None => {
                            log::warn!("Location stream closed");
                            fixes = None;
                        }
                    }
                }
                _ = next_tick(&mut ticker) => {
                    self.tracker.tick();
                }
                Some(done) = done_rx.recv() => {
                    self.on_completion(done);
                }
            }
            self.publish();
        }
    }

    async fn start(
        &mut self,
        done_tx: &mpsc::Sender<Completion>,
        fixes: &mut Option<mpsc::Receiver<RawFix>>,
        ticker: &mut Option<Interval>,
    ) -> TrackerResult<()> {
        if matches!(self.tracker.state(), RunState::Running | RunState::Paused) {
            return Err(TrackerError::AlreadyRunning);
        }

        self.initializing = true;
        self.publish();
        let permission = self.provider.request_permission().await;
        let result = self.begin_run(permission, done_tx, fixes, ticker).await;
        self.initializing = false;
        result
    }

    async fn begin_run(
        &mut self,
        permission: LocationPermission,
        done_tx: &mpsc::Sender<Completion>,
        fixes: &mut Option<mpsc::Receiver<RawFix>>,
        ticker: &mut Option<Interval>,
    ) -> TrackerResult<()> {
        let ticket = self.tracker.start(permission)?;

        let rx = match self.provider.subscribe().await {
            Ok(rx) => rx,
            Err(e) => {
                log::warn!("Location subscription failed: {}", e);
                match self.tracker.stop() {
                    Ok(summary) => log::debug!(
                        "Rolled back run without location ({} fixes)",
                        summary.fixes.received
                    ),
                    Err(stop_err) => log::debug!("Nothing to roll back: {}", stop_err),
                }
                return Err(e);
            }
        };
        if let Err(e) = self.provider.enable_background().await {
            log::warn!("Background location unavailable, continuing in foreground: {}", e);
        }

        *fixes = Some(rx);
        *ticker = Some(tick_interval());

        let remote = Arc::clone(&self.remote);
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result = remote.start_session(&ticket.request).await;
            let _ = done_tx
                .send(Completion::SessionStarted {
                    run_id: ticket.run_id,
                    result,
                })
                .await;
        });
        Ok(())
    }

    fn on_fix(&mut self, fix: &RawFix, done_tx: &mpsc::Sender<Completion>) {
        let FixOutcome::Accepted {
            sync: Some(request),
            ..
        } = self.tracker.handle_fix(fix)
        else {
            return;
        };

        let remote = Arc::clone(&self.remote);
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result = remote.push_progress(&request.payload).await;
            let _ = done_tx.send(Completion::Synced { request, result }).await;
        });
    }

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::SessionStarted { run_id, result } => {
                self.tracker.assign_session_id(run_id, result);
            }
            Completion::Synced { request, result } => {
                self.tracker.complete_sync(&request, result);
            }
        }
    }

    async fn release(
        &mut self,
        fixes: &mut Option<mpsc::Receiver<RawFix>>,
        ticker: &mut Option<Interval>,
    ) {
        self.provider.unsubscribe().await;
        *fixes = None;
        *ticker = None;
    }

    async fn shutdown(
        &mut self,
        fixes: &mut Option<mpsc::Receiver<RawFix>>,
        ticker: &mut Option<Interval>,
    ) {
        if self.tracker.stop().is_ok() {
            self.release(fixes, ticker).await;
        }
        self.publish();
    }

    fn publish(&self) {
        let mut snapshot = self.tracker.snapshot();
        snapshot.is_initializing |= self.initializing;
        self.snapshots.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::geo::METERS_PER_DEG_LAT;
    use crate::sync::{OfflineRemote, ProgressPayload, StartSessionRequest};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    const T0: i64 = 1_700_000_000_000;

    struct ChannelProvider {
        permission: LocationPermission,
        receiver: Mutex<Option<mpsc::Receiver<RawFix>>>,
        background_ok: bool,
        background_requested: AtomicBool,
        unsubscribed: AtomicBool,
    }

    impl ChannelProvider {
        fn new(permission: LocationPermission) -> (Arc<Self>, mpsc::Sender<RawFix>) {
            let (tx, rx) = mpsc::channel(64);
            let provider = Arc::new(Self {
                permission,
                receiver: Mutex::new(Some(rx)),
                background_ok: true,
                background_requested: AtomicBool::new(false),
                unsubscribed: AtomicBool::new(false),
            });
            (provider, tx)
        }
    }

    #[async_trait]
    impl LocationProvider for ChannelProvider {
        async fn request_permission(&self) -> LocationPermission {
            self.permission
        }

        async fn subscribe(&self) -> TrackerResult<mpsc::Receiver<RawFix>> {
            self.receiver
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| TrackerError::LocationUnavailable("already subscribed".to_string()))
        }

        async fn enable_background(&self) -> TrackerResult<()> {
            self.background_requested.store(true, Ordering::SeqCst);
            if self.background_ok {
                Ok(())
            } else {
                Err(TrackerError::LocationUnavailable("background denied".to_string()))
            }
        }

        async fn unsubscribe(&self) {
            self.unsubscribed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingRemote {
        pushed: Mutex<Vec<ProgressPayload>>,
    }

    #[async_trait]
    impl ProgressRemote for RecordingRemote {
        async fn start_session(&self, _request: &StartSessionRequest) -> Result<String, RemoteError> {
            Ok("srv-1".to_string())
        }

        async fn push_progress(&self, payload: &ProgressPayload) -> Result<(), RemoteError> {
            self.pushed.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    fn fix_north(meters: f64, t: i64) -> RawFix {
        RawFix::new(37.5 + meters / METERS_PER_DEG_LAT, 127.0, t)
            .with_accuracy(5.0)
            .with_speed(2.8)
    }

    async fn wait_for(
        rx: &mut watch::Receiver<TrackerSnapshot>,
        pred: impl Fn(&TrackerSnapshot) -> bool,
    ) -> TrackerSnapshot {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let current = rx.borrow_and_update();
                    if pred(&*current) {
                        return current.clone();
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("snapshot condition not reached")
    }

    #[tokio::test]
    async fn test_permission_denied_fails_start() {
        let clock = Arc::new(ManualClock::new(T0));
        let (provider, _tx) = ChannelProvider::new(LocationPermission::Denied);
        let handle = spawn_tracker(
            TrackerConfig::default(),
            clock,
            provider.clone(),
            Arc::new(OfflineRemote),
        );

        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, TrackerError::PermissionDenied));
        assert!(!handle.snapshot().is_running);
        assert!(!provider.background_requested.load(Ordering::SeqCst));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_lifecycle_with_sync() {
        let clock = Arc::new(ManualClock::new(T0));
        let (provider, tx) = ChannelProvider::new(LocationPermission::Granted);
        let remote = Arc::new(RecordingRemote::default());
        let handle = spawn_tracker(
            TrackerConfig::default(),
            clock.clone(),
            provider.clone(),
            remote.clone(),
        );
        let mut snapshots = handle.subscribe();

        handle.start().await.unwrap();
        assert!(matches!(handle.start().await, Err(TrackerError::AlreadyRunning)));
        assert!(provider.background_requested.load(Ordering::SeqCst));
        wait_for(&mut snapshots, |s| s.session_id.as_deref() == Some("srv-1")).await;

        tx.send(fix_north(0.0, T0)).await.unwrap();
        wait_for(&mut snapshots, |s| s.route.len() == 1).await;
        clock.set(T0 + 5000);
        tx.send(fix_north(14.0, T0 + 5000)).await.unwrap();
        let snapshot = wait_for(&mut snapshots, |s| s.route.len() == 2).await;
        assert!(snapshot.is_running);
        assert!(snapshot.distance_km > 0.0);

        tokio::time::timeout(Duration::from_secs(5), async {
            while remote.pushed.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("progress was never pushed");
        let pushed = remote.pushed.lock().unwrap().clone();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].session_id, "srv-1");
        assert_eq!(pushed[0].current_point.sequence, 2);

        handle.pause().await.unwrap();
        assert!(handle.snapshot().is_paused);
        handle.resume().await.unwrap();

        let summary = handle.stop().await.unwrap();
        assert_eq!(summary.session_id.as_deref(), Some("srv-1"));
        assert_eq!(summary.route.len(), 2);
        assert_eq!(summary.sync.attempts, 1);
        assert!(provider.unsubscribed.load(Ordering::SeqCst));
        assert!(!handle.snapshot().is_running);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_offline_remote_uses_local_session_id() {
        let clock = Arc::new(ManualClock::new(T0));
        let (provider, _tx) = ChannelProvider::new(LocationPermission::Granted);
        let handle = spawn_tracker(
            TrackerConfig::default(),
            clock,
            provider,
            Arc::new(OfflineRemote),
        );
        let mut snapshots = handle.subscribe();

        handle.start().await.unwrap();
        let expected = format!("local_{}", T0);
        wait_for(&mut snapshots, |s| s.session_id.as_deref() == Some(expected.as_str())).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_background_failure_is_not_fatal() {
        let clock = Arc::new(ManualClock::new(T0));
        let (tx_unused, rx) = mpsc::channel(4);
        drop(tx_unused);
        let provider = Arc::new(ChannelProvider {
            permission: LocationPermission::Granted,
            receiver: Mutex::new(Some(rx)),
            background_ok: false,
            background_requested: AtomicBool::new(false),
            unsubscribed: AtomicBool::new(false),
        });
        let handle = spawn_tracker(
            TrackerConfig::default(),
            clock,
            provider.clone(),
            Arc::new(OfflineRemote),
        );

        handle.start().await.unwrap();
        assert!(provider.background_requested.load(Ordering::SeqCst));
        assert!(handle.snapshot().is_running);

        // a closed location stream leaves the run alive
        handle.pause().await.unwrap();
        handle.stop().await.unwrap();
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribe_failure_rolls_back_run() {
        let clock = Arc::new(ManualClock::new(T0));
        let provider = Arc::new(ChannelProvider {
            permission: LocationPermission::Granted,
            receiver: Mutex::new(None),
            background_ok: true,
            background_requested: AtomicBool::new(false),
            unsubscribed: AtomicBool::new(false),
        });
        let handle = spawn_tracker(
            TrackerConfig::default(),
            clock,
            provider.clone(),
            Arc::new(OfflineRemote),
        );

        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, TrackerError::LocationUnavailable(_)));
        let snapshot = handle.snapshot();
        assert!(!snapshot.is_running);
        assert!(!snapshot.is_initializing);
        assert!(!provider.background_requested.load(Ordering::SeqCst));

        // no run is left behind to block the next attempt
        assert!(matches!(
            handle.start().await,
            Err(TrackerError::LocationUnavailable(_))
        ));
        assert!(matches!(handle.pause().await, Err(TrackerError::NotRunning)));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_commands_without_run_fail() {
        let clock = Arc::new(ManualClock::new(T0));
        let (provider, _tx) = ChannelProvider::new(LocationPermission::Granted);
        let handle = spawn_tracker(
            TrackerConfig::default(),
            clock,
            provider,
            Arc::new(OfflineRemote),
        );
        assert!(matches!(handle.pause().await, Err(TrackerError::NotRunning)));
        assert!(matches!(handle.stop().await, Err(TrackerError::NotRunning)));
        handle.shutdown().await;
    }
}
