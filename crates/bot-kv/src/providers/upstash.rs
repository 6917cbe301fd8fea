//! Upstash Redis REST API backend.
//!
//! Upstash exposes plain Redis semantics over HTTPS: a single command is
//! POSTed as a JSON array to the database URL, authenticated with a
//! bearer token. `SET ... NX` gives us if-not-exists for free; if-equals
//! is implemented with a small `EVAL` script so the compare-then-write
//! stays a single atomic round trip on the server.

use crate::backend::{CasCondition, KvBackend};
use crate::error::{KvError, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Configuration for an Upstash Redis REST database.
#[derive(Debug, Clone)]
pub struct UpstashConfig {
    /// Full REST URL for the database, e.g. `https://usw1-abc.upstash.io`.
    pub url: String,
    /// Read/write token for the database.
    pub token: String,
}

pub struct UpstashBackend {
    config: UpstashConfig,
    client: reqwest::Client,
}

impl UpstashBackend {
    pub fn new(config: UpstashConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn command(&self, args: Vec<Value>) -> Result<Value> {
        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.token)
            .json(&args)
            .send()
            .await
            .map_err(|e| KvError::classify(&e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(KvError::QuotaExceeded);
            }
            return Err(KvError::classify(&format!("upstash {status}: {body}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| KvError::Protocol(e.to_string()))?;

        if let Some(err) = body.get("error").and_then(|v| v.as_str()) {
            return Err(KvError::classify(err));
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl KvBackend for UpstashBackend {
    fn name(&self) -> &'static str {
        "upstash"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let result = self.command(vec!["GET".into(), key.into()]).await?;
        Ok(result.as_str().map(|s| s.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let mut args = vec![Value::from("SET"), key.into(), value.into()];
        if let Some(ttl) = ttl_secs {
            args.push("EX".into());
            args.push(ttl.into());
        }
        self.command(args).await?;
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
                let mut args = vec![Value::from("SET"), key.into(), value.into(), "NX".into()];
                if let Some(ttl) = ttl_secs {
                    args.push("EX".into());
                    args.push(ttl.into());
                }
                let result = self.command(args).await?;
                Ok(!result.is_null())
            }
            CasCondition::IfEquals(expected) => {
                let ttl_arg = ttl_secs.map(|t| t.to_string()).unwrap_or_else(|| "0".to_string());
                let script = r#"
                    if redis.call('GET', KEYS[1]) == ARGV[1] then
                        if ARGV[3] == '0' then
                            return redis.call('SET', KEYS[1], ARGV[2])
                        else
                            return redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
                        end
                    else
                        return nil
                    end
                "#;
                let result = self
                    .command(vec![
                        "EVAL".into(),
                        script.into(),
                        "1".into(),
                        key.into(),
                        expected.into(),
                        value.into(),
                        ttl_arg.into(),
                    ])
                    .await?;
                Ok(!result.is_null())
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = self.command(vec!["DEL".into(), key.into()]).await?;
        Ok(result.as_i64().unwrap_or(0) > 0)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{prefix}*");
        let result = self.command(vec!["KEYS".into(), pattern.into()]).await?;
        Ok(result
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default())
    }
}
