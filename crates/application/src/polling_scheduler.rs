use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Floor for the stats polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Cooperative cancellation flag shared with whoever may halt polling.
/// Poll phases check it before each step.
#[derive(Debug, Clone)]
pub struct PollingHandle {
    running: Arc<AtomicBool>,
}

impl PollingHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop polling immediately; a poll in flight stops at its next phase.
    pub fn halt(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Single repeating poll timer.
///
/// The tokio interval is created lazily on the first `tick()` so that the
/// scheduler can be started outside a runtime; its phase is anchored at the
/// instant `start()` was first called.
#[derive(Debug)]
pub struct PollingScheduler {
    interval: Duration,
    running: Arc<AtomicBool>,
    started_at: Option<Instant>,
    timer: Option<Interval>,
}

impl PollingScheduler {
    /// Requested intervals below [`DEFAULT_POLL_INTERVAL`] are raised to it.
    pub fn new(requested: Duration) -> Self {
        let interval = if requested < DEFAULT_POLL_INTERVAL {
            debug!(
                requested_ms = requested.as_millis(),
                floor_ms = DEFAULT_POLL_INTERVAL.as_millis(),
                "poll interval raised to floor"
            );
            DEFAULT_POLL_INTERVAL
        } else {
            requested
        };
        Self {
            interval,
            running: Arc::new(AtomicBool::new(false)),
            started_at: None,
            timer: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn handle(&self) -> PollingHandle {
        PollingHandle {
            running: Arc::clone(&self.running),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns `false` if polling was already running; the original phase
    /// is kept in that case.
    pub fn start(&mut self) -> bool {
        if self.is_running() && self.started_at.is_some() {
            return false;
        }
        self.running.store(true, Ordering::Release);
        self.started_at = Some(Instant::now());
        self.timer = None;
        true
    }

    /// Returns `false` if polling was not running.
    pub fn stop(&mut self) -> bool {
        let was_running = self.is_running() && self.started_at.is_some();
        self.running.store(false, Ordering::Release);
        self.started_at = None;
        self.timer = None;
        was_running
    }

    /// Resolve at the next poll deadline. Never resolves while stopped.
    pub async fn tick(&mut self) {
        if !self.is_running() {
            // Halted through a handle.
            self.started_at = None;
            self.timer = None;
        }
        let Some(started_at) = self.started_at else {
            std::future::pending::<()>().await;
            return;
        };
        let period = self.interval;
        let timer = self.timer.get_or_insert_with(|| {
            let mut timer = tokio::time::interval_at(started_at + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        timer.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_below_floor_is_raised() {
        let scheduler = PollingScheduler::new(Duration::from_millis(100));
        assert_eq!(scheduler.interval(), DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn interval_above_floor_is_honored() {
        let scheduler = PollingScheduler::new(Duration::from_millis(7_250));
        assert_eq!(scheduler.interval(), Duration::from_millis(7_250));
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut scheduler = PollingScheduler::new(DEFAULT_POLL_INTERVAL);
        assert!(!scheduler.stop());
        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.is_running());
        assert!(scheduler.stop());
        assert!(!scheduler.stop());
    }

    #[test]
    fn handle_halts_scheduler() {
        let mut scheduler = PollingScheduler::new(DEFAULT_POLL_INTERVAL);
        let handle = scheduler.handle();
        scheduler.start();
        assert!(handle.is_running());
        handle.halt();
        assert!(!scheduler.is_running());
        assert!(scheduler.start());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_at_interval_after_start() {
        let mut scheduler = PollingScheduler::new(DEFAULT_POLL_INTERVAL);
        let begin = Instant::now();
        scheduler.start();
        scheduler.tick().await;
        assert_eq!(begin.elapsed(), DEFAULT_POLL_INTERVAL);
        scheduler.tick().await;
        assert_eq!(begin.elapsed(), DEFAULT_POLL_INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_keeps_phase() {
        let mut scheduler = PollingScheduler::new(DEFAULT_POLL_INTERVAL);
        let begin = Instant::now();
        scheduler.start();
        tokio::time::advance(Duration::from_millis(3_000)).await;
        assert!(!scheduler.start());
        scheduler.tick().await;
        assert_eq!(begin.elapsed(), DEFAULT_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_scheduler_never_ticks() {
        let mut scheduler = PollingScheduler::new(DEFAULT_POLL_INTERVAL);
        scheduler.start();
        scheduler.stop();
        let res = tokio::time::timeout(Duration::from_secs(60), scheduler.tick()).await;
        assert!(res.is_err());
    }
}
