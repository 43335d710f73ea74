//! Feedback monitor - tracks when the controller last sent usable data
//!
//! Stores monotonic microseconds relative to the monitor's own creation instant,
//! so it is unaffected by wall-clock changes and fits in an `AtomicU64`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Sentinel for "no feedback yet"
const NEVER: u64 = u64::MAX;

/// Last-feedback tracker
#[derive(Debug)]
pub struct FeedbackMonitor {
    anchor: Instant,
    last_feedback_us: AtomicU64,
}

impl Default for FeedbackMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackMonitor {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            last_feedback_us: AtomicU64::new(NEVER),
        }
    }

    fn now_us(&self) -> u64 {
        self.anchor.elapsed().as_micros() as u64
    }

    /// Record that an inbound update was applied
    pub fn register_feedback(&self) {
        self.last_feedback_us.store(self.now_us(), Ordering::Relaxed);
    }

    /// Time since last feedback, `None` if nothing has arrived yet
    pub fn time_since_last_feedback(&self) -> Option<Duration> {
        let last = self.last_feedback_us.load(Ordering::Relaxed);
        if last == NEVER {
            return None;
        }
        Some(Duration::from_micros(self.now_us().saturating_sub(last)))
    }

    /// True if feedback arrived within `timeout`
    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.time_since_last_feedback()
            .is_some_and(|elapsed| elapsed < timeout)
    }
}
