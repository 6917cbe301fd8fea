//! Tunables for the lock manager, matching the coordination-core defaults.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// Default lease length when a caller doesn't specify one.
    pub default_ttl: Duration,
    /// How often a held lock's heartbeat ticker renews its lease.
    pub heartbeat_interval: Duration,
    /// Renew when remaining lease time drops to or below this threshold.
    pub renewal_threshold: Duration,
    /// Short waits between acquisition retries against a held lock.
    pub retry_wait: Duration,
    /// Acquisition retries against a currently-held, unexpired lock.
    pub max_retries: u32,
    /// Expired-lock sweeper interval.
    pub sweep_interval: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(10),
            renewal_threshold: Duration::from_secs(30),
            retry_wait: Duration::from_millis(100),
            max_retries: 3,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_numbers() {
        let config = LockManagerConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.renewal_threshold, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }
}
