//! Tunables for the router and the extension link. Defaults match §4's
//! recommended values; everything here is overridable by the daemon's
//! layered configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_heartbeat_timeout_secs() -> u64 {
    90
}

fn default_grace_window_secs() -> u64 {
    60
}

fn default_session_queue_cap() -> usize {
    256
}

fn default_global_pending_cap() -> usize {
    8192
}

fn default_inactivity_sweep_secs() -> Option<u64> {
    None
}

fn default_idle_threshold_secs() -> u64 {
    360
}

/// Router-wide tunables. Every field has a spec-recommended or
/// conservative default, so an empty config file is a valid config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,

    #[serde(default = "default_session_queue_cap")]
    pub session_queue_cap: usize,

    #[serde(default = "default_global_pending_cap")]
    pub global_pending_cap: usize,

    /// Interval between inactivity sweeps. `None` (the default) disables
    /// the sweep entirely; it is not load-bearing for correctness, only
    /// a memory-hygiene measure for sessions the caller forgot to end.
    #[serde(default = "default_inactivity_sweep_secs")]
    pub inactivity_sweep_secs: Option<u64>,

    /// How long a session may sit idle (no pending, no queue) before the
    /// sweep tears it down, when the sweep is enabled. Distinct from
    /// `inactivity_sweep_secs`, which only controls how often the sweep
    /// runs, not what it considers stale.
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            grace_window_secs: default_grace_window_secs(),
            session_queue_cap: default_session_queue_cap(),
            global_pending_cap: default_global_pending_cap(),
            inactivity_sweep_secs: default_inactivity_sweep_secs(),
            idle_threshold_secs: default_idle_threshold_secs(),
        }
    }
}

impl RouterConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_window_secs)
    }

    pub fn inactivity_sweep_interval(&self) -> Option<Duration> {
        self.inactivity_sweep_secs.map(Duration::from_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_recommended_values() {
        let cfg = RouterConfig::default();
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert_eq!(cfg.heartbeat_timeout_secs, 90);
        assert_eq!(cfg.grace_window_secs, 60);
        assert_eq!(cfg.session_queue_cap, 256);
        assert_eq!(cfg.global_pending_cap, 8192);
        assert!(cfg.inactivity_sweep_interval().is_none());
    }

    #[test]
    fn empty_toml_document_is_a_valid_config() {
        let cfg: RouterConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.heartbeat_interval_secs, 30);
    }
}
