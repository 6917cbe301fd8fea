//! Cloudflare Workers KV backend.
//!
//! Workers KV has no native compare-and-set primitive. `IfNotExists` is
//! implemented as a get-then-put, which is not linearizable under true
//! concurrent writers — acceptable here only because this backend is
//! wired in as the *fallback* provider (see `bot-kv::config`), never the
//! default for lock acquisition; the transport's failover policy only
//! routes lock-sensitive traffic here when the primary (Upstash, which
//! does offer an atomic conditional write) is unreachable.
//! `IfEquals` is rejected outright rather than silently racing.

use crate::backend::{CasCondition, KvBackend};
use crate::error::{KvError, Result};
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CloudflareConfig {
    pub account_id: String,
    pub namespace_id: String,
    pub token: String,
    /// Override for the API base URL; defaults to the public Cloudflare
    /// API. Exposed so tests can point at a local stand-in.
    pub api_base: Option<String>,
}

pub struct CloudflareBackend {
    config: CloudflareConfig,
    client: reqwest::Client,
}

impl CloudflareBackend {
    pub fn new(config: CloudflareConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn base_url(&self) -> String {
        self.config
            .api_base
            .clone()
            .unwrap_or_else(|| "https://api.cloudflare.com/client/v4".to_string())
    }

    fn value_url(&self, key: &str) -> String {
        format!(
            "{}/accounts/{}/storage/kv/namespaces/{}/values/{}",
            self.base_url(),
            self.config.account_id,
            self.config.namespace_id,
            urlencoding_key(key),
        )
    }

    fn keys_url(&self, prefix: &str) -> String {
        format!(
            "{}/accounts/{}/storage/kv/namespaces/{}/keys?prefix={}",
            self.base_url(),
            self.config.account_id,
            self.config.namespace_id,
            urlencoding_key(prefix),
        )
    }
}

fn urlencoding_key(key: &str) -> String {
    url::form_urlencoded::byte_serialize(key.as_bytes()).collect()
}

#[async_trait]
impl KvBackend for CloudflareBackend {
    fn name(&self) -> &'static str {
        "cloudflare"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.value_url(key))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(|e| KvError::classify(&e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(KvError::QuotaExceeded);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(KvError::classify(&format!("cloudflare {status}: {body}")));
        }

        Ok(Some(response.text().await.map_err(|e| KvError::Protocol(e.to_string()))?))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let mut url = self.value_url(key);
        if let Some(ttl) = ttl_secs {
            url.push_str(&format!("&expiration_ttl={ttl}"));
            // value_url has no query yet, so swap the separator if needed.
            if !url.contains('?') {
                url = url.replacen('&', "?", 1);
            }
        }

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.config.token)
            .body(value.to_string())
            .send()
            .await
            .map_err(|e| KvError::classify(&e.to_string()))?;

        if !response.status().is_success() {
            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(KvError::QuotaExceeded);
            }
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(KvError::classify(&format!("cloudflare {status}: {body}")));
        }
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
        condition: CasCondition,
    ) -> Result<bool> {
        match condition {
            CasCondition::IfNotExists => {
                if self.get(key).await?.is_some() {
                    return Ok(false);
                }
                self.set(key, value, ttl_secs).await?;
                Ok(true)
            }
            CasCondition::IfEquals(_) => Err(KvError::Protocol(
                "cloudflare backend does not support if-equals CAS; use the primary provider"
                    .to_string(),
            )),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.get(key).await?.is_some();
        let response = self
            .client
            .delete(self.value_url(key))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(|e| KvError::classify(&e.to_string()))?;

        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            let status = response.status();
            return Err(KvError::classify(&format!("cloudflare delete {status}")));
        }
        Ok(existed)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.keys_url(prefix))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(|e| KvError::classify(&e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(KvError::classify(&format!("cloudflare list {status}")));
        }

        let body: Value = response.json().await.map_err(|e| KvError::Protocol(e.to_string()))?;
        let keys = body
            .get("result")
            .and_then(|r| r.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|entry| entry.get("name").and_then(|n| n.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(keys)
    }
}
