//! Runtime provider selection: a configuration enum resolved from
//! environment variables, turned into a concrete backend trait object
//! via `into_backend()`.

use crate::backend::KvBackend;
use crate::error::{KvError, Result};
use crate::providers::{CloudflareBackend, CloudflareConfig, UpstashBackend, UpstashConfig};
use std::sync::Arc;
use std::time::Duration;

/// A single provider's configuration, tagged by which concrete backend it
/// resolves to.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    Upstash(UpstashConfig),
    Cloudflare(CloudflareConfig),
}

impl ProviderConfig {
    pub fn tag(&self) -> &'static str {
        match self {
            ProviderConfig::Upstash(_) => "upstash",
            ProviderConfig::Cloudflare(_) => "cloudflare",
        }
    }

    /// Construct the concrete backend this configuration describes.
    pub fn into_backend(self) -> Arc<dyn KvBackend> {
        match self {
            ProviderConfig::Upstash(c) => Arc::new(UpstashBackend::new(c)),
            ProviderConfig::Cloudflare(c) => Arc::new(CloudflareBackend::new(c)),
        }
    }
}

/// Primary + optional fallback provider selection.
#[derive(Debug, Clone)]
pub struct KvProviderConfig {
    pub primary: ProviderConfig,
    pub fallback: Option<ProviderConfig>,
}

impl KvProviderConfig {
    /// Resolve provider configuration from the environment inputs named
    /// in the coordination-core spec: `ACCOUNT_ID`/`NAMESPACE_ID`/`TOKEN`
    /// describe the Cloudflare-shaped provider, `URL`/`TOKEN` describe the
    /// Upstash-shaped provider, and `KV_PROVIDER` can force the primary's
    /// backend choice.
    ///
    /// Cloudflare's backend rejects every if-equals CAS outright (see
    /// `providers::cloudflare`), and every heartbeat renewal and lock
    /// steal is an if-equals CAS, so Cloudflare can never be the unforced
    /// default primary — it is wired in only as the fallback, or as
    /// primary when `KV_PROVIDER=cloudflare` is set explicitly.
    pub fn from_env() -> Result<Self> {
        let forced = std::env::var("KV_PROVIDER").ok();

        let primary = match forced.as_deref() {
            Some("upstash") => ProviderConfig::Upstash(UpstashConfig {
                url: require_env("URL")?,
                token: require_env("TOKEN")?,
            }),
            Some("cloudflare") => ProviderConfig::Cloudflare(CloudflareConfig {
                account_id: require_env("ACCOUNT_ID")?,
                namespace_id: require_env("NAMESPACE_ID")?,
                token: require_env("TOKEN")?,
                api_base: None,
            }),
            None => match (std::env::var("URL").ok(), std::env::var("TOKEN").ok()) {
                (Some(url), Some(token)) => ProviderConfig::Upstash(UpstashConfig { url, token }),
                _ => {
                    return Err(KvError::Configuration(
                        "no KV_PROVIDER set and no URL/TOKEN (Upstash) credentials found; \
                         Cloudflare alone cannot serve as the unforced primary since it \
                         cannot CAS-if-equals, required by every lock renewal and steal. \
                         Set KV_PROVIDER=cloudflare to accept that limitation explicitly."
                            .to_string(),
                    ))
                }
            },
            Some(other) => {
                return Err(KvError::Configuration(format!(
                    "unknown KV_PROVIDER '{other}'; expected 'upstash' or 'cloudflare'"
                )))
            }
        };

        let fallback = match (std::env::var("ACCOUNT_ID").ok(), std::env::var("NAMESPACE_ID").ok(), std::env::var("TOKEN").ok()) {
            (Some(account_id), Some(namespace_id), Some(token)) if primary.tag() != "cloudflare" => {
                Some(ProviderConfig::Cloudflare(CloudflareConfig { account_id, namespace_id, token, api_base: None }))
            }
            _ => None,
        };

        Ok(Self { primary, fallback })
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| KvError::Configuration(format!("missing environment variable {name}")))
}

/// Tunables for the transport's retry, failover, and L1 cache behavior.
/// All defaults match the coordination-core spec's numbers.
#[derive(Debug, Clone)]
pub struct KvTransportConfig {
    /// Attempts against the currently-selected provider before giving up
    /// on a single operation (does not by itself trigger failover).
    pub max_attempts: u32,
    /// Linear backoff step between attempts.
    pub retry_backoff: Duration,
    /// Consecutive retryable failures on the active provider before
    /// switching to the fallback.
    pub failover_threshold: u32,
    /// Recovery probe interval after a normal (non-quota) failover.
    pub recovery_probe_interval: Duration,
    /// Recovery probe interval after a quota-ceiling failover.
    pub recovery_probe_interval_quota: Duration,
    /// L1 cache entry lifetime.
    pub cache_ttl: Duration,
}

impl Default for KvTransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
            failover_threshold: 3,
            recovery_probe_interval: Duration::from_secs(30 * 60),
            recovery_probe_interval_quota: Duration::from_secs(12 * 60 * 60),
            cache_ttl: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_numbers() {
        let config = KvTransportConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.failover_threshold, 3);
        assert_eq!(config.recovery_probe_interval, Duration::from_secs(1800));
        assert_eq!(config.recovery_probe_interval_quota, Duration::from_secs(43200));
        assert_eq!(config.cache_ttl, Duration::from_secs(10));
    }
}
