//! Operational counters. Not protocol-observable — exposed only through
//! the daemon's health surface, so callers can't build retry logic on
//! top of numbers that depend on implementation details.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RouterMetrics {
    pub malformed_frames_dropped: AtomicU64,
    pub events_dropped: AtomicU64,
    pub frames_dispatched: AtomicU64,
    pub responses_matched: AtomicU64,
    pub timeouts_fired: AtomicU64,
    pub cancellations: AtomicU64,
    pub reconnect_count: AtomicU64,
}

/// A point-in-time copy, safe to serialize for `GET /health`.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub malformed_frames_dropped: u64,
    pub events_dropped: u64,
    pub frames_dispatched: u64,
    pub responses_matched: u64,
    pub timeouts_fired: u64,
    pub cancellations: u64,
    pub reconnect_count: u64,
}

impl RouterMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            malformed_frames_dropped: self.malformed_frames_dropped.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            timeouts_fired: self.timeouts_fired.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = RouterMetrics::default();
        RouterMetrics::incr(&metrics.frames_dispatched);
        RouterMetrics::incr(&metrics.frames_dispatched);
        assert_eq!(metrics.snapshot().frames_dispatched, 2);
    }
}
