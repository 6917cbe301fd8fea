//! Tunables for the shutdown supervisor, matching the coordination-core
//! numerics.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Overall budget for draining active work before force-cleaning.
    pub drain_timeout: Duration,
    /// Cadence at which the task-drain loop polls registered counters.
    pub drain_poll_interval: Duration,
    /// Log a warning once drain has been stalled at least this long.
    pub drain_stall_warn: Duration,
    /// Per-hook execution budget.
    pub hook_timeout: Duration,
    /// Shutdowns occurring within this long of process start exit 125
    /// instead of 0/1 — a probable misconfiguration signal.
    pub min_clean_uptime: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(60),
            drain_poll_interval: Duration::from_secs(1),
            drain_stall_warn: Duration::from_secs(10),
            hook_timeout: Duration::from_secs(5),
            min_clean_uptime: Duration::from_secs(5 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_numbers() {
        let config = ShutdownConfig::default();
        assert_eq!(config.drain_timeout, Duration::from_secs(60));
        assert_eq!(config.drain_poll_interval, Duration::from_secs(1));
        assert_eq!(config.drain_stall_warn, Duration::from_secs(10));
        assert_eq!(config.hook_timeout, Duration::from_secs(5));
        assert_eq!(config.min_clean_uptime, Duration::from_secs(300));
    }
}
