//! Heartbeat helpers for the Extension Link.
//!
//! The link sends `Ping` every `H` and expects either a `Pong` or other
//! traffic within `K`; two missed intervals without any inbound frame
//! means the link is dead. The first heartbeat is jittered so a fleet of
//! extensions reconnecting after a router restart doesn't thunder in at
//! once. The extension is the one that dials back in after a drop (§4.2),
//! so there is no router-initiated reconnect backoff to compute here.

use std::time::Duration;

/// Picks a jittered first-heartbeat delay in `[0, interval)`, matching
/// the thundering-herd guard used for the first beat of a connection.
pub fn jittered_first_delay(interval: Duration) -> Duration {
    let factor = f64::from(fastrand::u32(0..1000)) / 1000.0;
    Duration::from_secs_f64(interval.as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_never_exceeds_interval() {
        for _ in 0..50 {
            let d = jittered_first_delay(Duration::from_secs(30));
            assert!(d < Duration::from_secs(30));
        }
    }
}
