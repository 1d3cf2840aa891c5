//! The health snapshot backing `GET /health`: link state, session/queue
//! depths, and the router's lifetime counters, in the spirit of a
//! standard liveness/readiness check.

use std::time::Duration;

use astra_router_core::{MetricsSnapshot, RouterStats};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Link bound, serving normally.
    Healthy,
    /// No link bound (sessions may still be in their grace window).
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub state: HealthState,
    pub uptime_secs: u64,
    pub link_bound: bool,
    pub session_count: usize,
    pub pending_count: usize,
    pub queued_count: usize,
    pub metrics: MetricsSnapshot,
}

impl HealthStatus {
    pub fn from_stats(stats: RouterStats, metrics: MetricsSnapshot, uptime: Duration) -> Self {
        Self {
            state: if stats.link_bound { HealthState::Healthy } else { HealthState::Degraded },
            uptime_secs: uptime.as_secs(),
            link_bound: stats.link_bound,
            session_count: stats.session_count,
            pending_count: stats.pending_count,
            queued_count: stats.queued_count,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_link_is_degraded_not_unhealthy() {
        let status = HealthStatus::from_stats(RouterStats::default(), MetricsSnapshot::default(), Duration::from_secs(3));
        assert_eq!(status.state, HealthState::Degraded);
        assert_eq!(status.uptime_secs, 3);
    }

    #[test]
    fn bound_link_is_healthy() {
        let stats = RouterStats { link_bound: true, session_count: 2, pending_count: 1, queued_count: 0 };
        let status = HealthStatus::from_stats(stats, MetricsSnapshot::default(), Duration::from_secs(10));
        assert_eq!(status.state, HealthState::Healthy);
        assert_eq!(status.session_count, 2);
    }
}
