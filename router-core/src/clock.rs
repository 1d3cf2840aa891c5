//! Injectable clock so deadline, grace-window, and heartbeat behavior can
//! be driven deterministically in tests without real wall-clock delays.
//!
//! Production code always uses [`TokioClock`]; tests substitute
//! `tokio::time::pause()` + `tokio::time::advance()`, which this clock is
//! built to cooperate with since it never reads `std::time::Instant`
//! directly.

use std::time::Duration;

use tokio::time::Instant;

/// A source of monotonic time and a sleep primitive, abstracted so the
/// router never calls `tokio::time::sleep` or `Instant::now` directly.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    fn sleep_until(&self, deadline: Instant) -> tokio::time::Sleep {
        tokio::time::sleep_until(deadline)
    }
}

/// The real clock, backed by tokio's timer wheel. Cooperates transparently
/// with `tokio::time::pause`/`advance` in `#[tokio::test(start_paused =
/// true)]` tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Compute an absolute deadline `timeout` from now, using the given clock.
pub fn deadline_from(clock: &dyn Clock, timeout: Duration) -> Instant {
    clock.now() + timeout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_from_advances_with_clock() {
        let clock = TokioClock;
        let start = clock.now();
        let deadline = deadline_from(&clock, Duration::from_secs(5));
        assert_eq!(deadline, start + Duration::from_secs(5));
    }
}
