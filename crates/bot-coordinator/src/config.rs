//! Tunables for the instance coordinator, matching the coordination-core
//! defaults.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub instance_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub task_lock_ttl: Duration,
    pub leader_lock_name: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            instance_timeout: Duration::from_secs(15 * 60),
            heartbeat_interval: Duration::from_secs(5 * 60),
            task_lock_ttl: Duration::from_secs(600),
            leader_lock_name: "coordination:leader".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_numbers() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.instance_timeout, Duration::from_secs(900));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(300));
        assert_eq!(config.task_lock_ttl, Duration::from_secs(600));
    }
}
