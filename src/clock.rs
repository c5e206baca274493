//! Wall-clock sources and pause-aware elapsed time.
//!
//! Elapsed time is always derived from wall-clock deltas, never incremented, so
//! a tick delayed by process suspension corrects itself on the next tick.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of wall-clock time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Settable clock for replays and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Pause accounting for one run
#[derive(Clone, Debug)]
pub struct SessionClock {
    start_epoch_ms: i64,
    paused_accum_ms: i64,
    paused_at: Option<i64>,
    /// Last value published by `tick`
    elapsed_secs: u64,
}

impl SessionClock {
    pub fn start(now_ms: i64) -> Self {
        Self {
            start_epoch_ms: now_ms,
            paused_accum_ms: 0,
            paused_at: None,
            elapsed_secs: 0,
        }
    }

    /// Active (unpaused) seconds at `now_ms`, floored
    pub fn elapsed_at(&self, now_ms: i64) -> u64 {
        let open_pause = self.paused_at.map_or(0, |p| (now_ms - p).max(0));
        let active_ms = now_ms - self.start_epoch_ms - self.paused_accum_ms - open_pause;
        (active_ms.max(0) / 1000) as u64
    }

    /// Recompute and publish elapsed seconds. A paused clock keeps its value.
    pub fn tick(&mut self, now_ms: i64) -> u64 {
        if self.paused_at.is_none() {
            // never publish a smaller value if the wall clock steps backwards
            self.elapsed_secs = self.elapsed_secs.max(self.elapsed_at(now_ms));
        }
        self.elapsed_secs
    }

    pub fn pause(&mut self, now_ms: i64) {
        if self.paused_at.is_none() {
            self.tick(now_ms);
            self.paused_at = Some(now_ms);
        }
    }

    pub fn resume(&mut self, now_ms: i64) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_accum_ms += (now_ms - paused_at).max(0);
            self.tick(now_ms);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    pub fn start_epoch_ms(&self) -> i64 {
        self.start_epoch_ms
    }

    pub fn paused_ms(&self) -> i64 {
        self.paused_accum_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(T0);
        clock.advance(1500);
        assert_eq!(clock.now_ms(), T0 + 1500);
        clock.set(T0);
        assert_eq!(clock.now_ms(), T0);
    }

    #[test]
    fn test_system_clock_is_epoch_ms() {
        // 2020-01-01 in epoch ms
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_elapsed_floors_to_seconds() {
        let mut clock = SessionClock::start(T0);
        assert_eq!(clock.tick(T0 + 999), 0);
        assert_eq!(clock.tick(T0 + 1000), 1);
        assert_eq!(clock.tick(T0 + 61_999), 61);
    }

    #[test]
    fn test_skipped_ticks_self_correct() {
        let mut clock = SessionClock::start(T0);
        clock.tick(T0 + 1000);
        // process suspended for ten minutes, then the next tick lands
        assert_eq!(clock.tick(T0 + 601_000), 601);
    }

    #[test]
    fn test_pause_excludes_paused_interval() {
        let mut clock = SessionClock::start(T0);
        clock.tick(T0 + 30_000);
        clock.pause(T0 + 30_000);

        // ticks while paused do not advance
        assert_eq!(clock.tick(T0 + 500_000), 30);
        assert_eq!(clock.elapsed_at(T0 + 500_000), 30);

        clock.resume(T0 + 630_000);
        assert_eq!(clock.tick(T0 + 650_000), 50);
        assert_eq!(clock.paused_ms(), 600_000);
    }

    #[test]
    fn test_repeated_pause_resume_cycles() {
        let mut clock = SessionClock::start(T0);
        let mut t = T0;
        for _ in 0..5 {
            t += 10_000;
            clock.pause(t);
            t += 7_000;
            clock.resume(t);
        }
        t += 2_500;
        assert_eq!(clock.tick(t), 52);
    }

    #[test]
    fn test_double_pause_and_resume_are_noops() {
        let mut clock = SessionClock::start(T0);
        clock.pause(T0 + 1000);
        clock.pause(T0 + 5000);
        clock.resume(T0 + 6000);
        clock.resume(T0 + 9000);
        assert_eq!(clock.paused_ms(), 5000);
        assert!(!clock.is_paused());
    }

    #[test]
    fn test_elapsed_never_decreases() {
        let mut clock = SessionClock::start(T0);
        assert_eq!(clock.tick(T0 + 10_000), 10);
        // wall clock stepped back
        assert_eq!(clock.tick(T0 + 4_000), 10);
    }
}
