//! Tunables for the media-group buffer, matching the coordination-core
//! numerics table.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub buffer_timeout: Duration,
    pub max_batch_size: usize,
    pub stale_threshold: Duration,
    pub cleanup_interval: Duration,
    pub lock_ttl: Duration,
    /// Upper bound on how many items a single user message may contribute
    /// to one link batch.
    pub link_batch_max: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_timeout: Duration::from_millis(1000),
            max_batch_size: 10,
            stale_threshold: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
            lock_ttl: Duration::from_secs(30),
            link_batch_max: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_numbers() {
        let config = BufferConfig::default();
        assert_eq!(config.buffer_timeout, Duration::from_millis(1000));
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.stale_threshold, Duration::from_secs(60));
        assert_eq!(config.cleanup_interval, Duration::from_secs(30));
        assert_eq!(config.lock_ttl, Duration::from_secs(30));
        assert_eq!(config.link_batch_max, 10);
    }
}
