//! KV transport error types.

use bot_common::CoreError;
use thiserror::Error;

/// Result alias for `bot-kv` operations.
pub type Result<T> = std::result::Result<T, KvError>;

#[derive(Error, Debug, Clone)]
pub enum KvError {
    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// CAS mismatch. Non-fatal — callers treat this as "someone else won
    /// the race" and retry their own higher-level logic.
    #[error("conflict on key {0}")]
    Conflict(String),

    #[error("key not found: {0}")]
    NotFound(String),

    /// Neither provider is reachable after exhausting retries on both.
    #[error("no KV provider reachable: {0}")]
    ProviderFatal(String),

    #[error("bad response from provider: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl KvError {
    /// Classify an error as worth a same-provider retry, per spec's
    /// quota/rate/network/timeout/generic-fetch-failure patterns.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KvError::QuotaExceeded | KvError::NetworkUnavailable(_) | KvError::Timeout(_)
        )
    }

    /// Whether this failure was caused by hitting a hard quota ceiling
    /// specifically (as opposed to a generic rate limit), which lengthens
    /// the recovery-probe interval from 30 minutes to 12 hours.
    pub fn is_quota_ceiling(&self) -> bool {
        matches!(self, KvError::QuotaExceeded)
    }

    /// Classify a raw transport error message using the same patterns a
    /// concrete backend implementation should apply to whatever error
    /// text its HTTP client surfaces.
    pub fn classify(message: &str) -> KvError {
        let lower = message.to_lowercase();
        if lower.contains("quota") || lower.contains("rate limit") || lower.contains("429") {
            KvError::QuotaExceeded
        } else if lower.contains("timeout") || lower.contains("timed out") {
            KvError::Timeout(message.to_string())
        } else if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("fetch failed")
        {
            KvError::NetworkUnavailable(message.to_string())
        } else {
            KvError::Protocol(message.to_string())
        }
    }
}

impl From<KvError> for CoreError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::QuotaExceeded => CoreError::Transient("quota exceeded".to_string()),
            KvError::NetworkUnavailable(s) => CoreError::Transient(s),
            KvError::Timeout(s) => CoreError::Transient(s),
            KvError::Conflict(s) => CoreError::CasConflict(s),
            KvError::NotFound(s) => CoreError::NotFound(s),
            KvError::ProviderFatal(s) => CoreError::ProviderFatal(s),
            KvError::Protocol(s) => CoreError::Internal(s),
            KvError::Configuration(s) => CoreError::Configuration(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_quota_messages() {
        assert!(matches!(KvError::classify("Quota exceeded for namespace"), KvError::QuotaExceeded));
        assert!(matches!(KvError::classify("429 Too Many Requests"), KvError::QuotaExceeded));
    }

    #[test]
    fn classifies_network_messages() {
        assert!(matches!(
            KvError::classify("fetch failed: connection refused"),
            KvError::NetworkUnavailable(_)
        ));
    }

    #[test]
    fn classifies_timeout_messages() {
        assert!(matches!(KvError::classify("request timed out"), KvError::Timeout(_)));
    }

    #[test]
    fn non_retryable_by_default() {
        let err = KvError::classify("500 internal server error");
        assert!(!err.is_retryable());
    }

    #[test]
    fn quota_is_retryable_and_a_ceiling() {
        let err = KvError::QuotaExceeded;
        assert!(err.is_retryable());
        assert!(err.is_quota_ceiling());
    }
}
