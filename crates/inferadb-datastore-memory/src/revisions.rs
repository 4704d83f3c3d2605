//! Revision quantization
//!
//! Time is measured on a monotonic clock from engine start and cut into
//! windows of `interval`. The quantized revision is the newest revision
//! committed at or before the start of the current window, so every caller
//! inside one window shares it.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use inferadb_datastore_types::Revision;

#[derive(Debug)]
pub(crate) struct RevisionClock {
    started: Instant,
    interval: Duration,
    /// Highest quantized revision handed out so far
    high_water: AtomicU64,
}

impl RevisionClock {
    pub(crate) fn new(interval: Duration) -> Self {
        Self { started: Instant::now(), interval, high_water: AtomicU64::new(0) }
    }

    /// Offset of "now" from engine start
    pub(crate) fn now(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether quantization is disabled and callers get head
    pub(crate) fn is_disabled(&self) -> bool {
        self.interval.is_zero()
    }

    /// Start of the window containing `now`
    pub(crate) fn window_start(&self, now: Duration) -> Duration {
        window_start(now, self.interval)
    }

    /// Never hand out a revision older than one already handed out
    pub(crate) fn observe(&self, candidate: Revision) -> Revision {
        let previous = self.high_water.fetch_max(candidate.0, Ordering::AcqRel);
        Revision(previous.max(candidate.0))
    }
}

fn window_start(now: Duration, interval: Duration) -> Duration {
    if interval.is_zero() {
        return now;
    }
    let windows = now.as_nanos() / interval.as_nanos();
    let start = windows.saturating_mul(interval.as_nanos());
    Duration::from_nanos(u64::try_from(start).unwrap_or(u64::MAX))
}
