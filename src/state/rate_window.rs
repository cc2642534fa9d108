//! Rolling per-minute dispatch ceiling
//!
//! Every fetch, probes included, takes a slot in one shared sixty-second window before
//! it is sent.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Length of the rolling window the per-minute ceiling applies to
pub const WINDOW: Duration = Duration::from_secs(60);

/// Tracks dispatch times inside a rolling one-minute window
///
/// This is shared by every job so the per-minute ceiling holds across the process,
/// not per division.
#[derive(Debug, Clone)]
pub struct DispatchLog {
    /// Dispatch instants, oldest first
    dispatched: VecDeque<Instant>,

    /// Dispatches allowed per window
    max_per_window: u32,
}

impl DispatchLog {
    /// Creates an empty log with the given ceiling
    pub fn new(max_per_window: u32) -> Self {
        Self {
            dispatched: VecDeque::new(),
            max_per_window: max_per_window.max(1),
        }
    }

    /// Drops dispatches that have left the window
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.dispatched.front() {
            if now.duration_since(oldest) >= WINDOW {
                self.dispatched.pop_front();
            } else {
                break;
            }
        }
    }

    /// Calculates the time until the next dispatch may happen
    ///
    /// Returns None if a dispatch can happen now, or the duration to wait otherwise.
    pub fn time_until_next_slot(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);

        if (self.dispatched.len() as u32) < self.max_per_window {
            return None;
        }

        self.dispatched
            .front()
            .map(|&oldest| WINDOW.saturating_sub(now.duration_since(oldest)))
    }

    /// Records that a dispatch happened
    pub fn record_dispatch(&mut self, now: Instant) {
        self.dispatched.push_back(now);
    }

    /// Number of dispatches currently inside the window
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.dispatched.len()
    }
}

/// Async wrapper around [`DispatchLog`] used by the scheduler
#[derive(Debug)]
pub struct RateWindow {
    log: Mutex<DispatchLog>,
}

impl RateWindow {
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self {
            log: Mutex::new(DispatchLog::new(max_requests_per_minute)),
        }
    }

    /// Waits until the window has room, then records a dispatch
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut log = self.log.lock().await;
                let now = Instant::now();
                match log.time_until_next_slot(now) {
                    None => {
                        log.record_dispatch(now);
                        return;
                    }
                    Some(wait) => wait,
                }
            };

            tracing::debug!("Per-minute ceiling reached, waiting {:?}", wait);
            // Small buffer so the oldest entry has definitely left the window
            tokio::time::sleep(wait + Duration::from_millis(5)).await;
        }
    }
}
