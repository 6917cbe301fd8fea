//! An in-memory `KvBackend`: a real, always-available implementation
//! (not test-gated) used for local development and, throughout this
//! workspace's test suites, as the substitute for a real KV provider.

use crate::backend::{CasCondition, KvBackend};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryBackend {
    store: DashMap<String, String>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.store.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: &str, _ttl_secs: Option<u64>) -> Result<()> {
        self.store.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn compare_and_set(&self, key: &str, value: &str, _ttl_secs: Option<u64>, condition: CasCondition) -> Result<bool> {
        match condition {
            CasCondition::IfNotExists => {
                if self.store.contains_key(key) {
                    Ok(false)
                } else {
                    self.store.insert(key.to_string(), value.to_string());
                    Ok(true)
                }
            }
            CasCondition::IfEquals(expected) => {
                let matches = self.store.get(key).map(|v| *v == expected).unwrap_or(false);
                if matches {
                    self.store.insert(key.to_string(), value.to_string());
                }
                Ok(matches)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.store.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.store.iter().filter(|e| e.key().starts_with(prefix)).map(|e| e.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get() {
        let backend = InMemoryBackend::new();
        backend.set("k", "v", None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn cas_if_not_exists() {
        let backend = InMemoryBackend::new();
        assert!(backend.compare_and_set("k", "v1", None, CasCondition::IfNotExists).await.unwrap());
        assert!(!backend.compare_and_set("k", "v2", None, CasCondition::IfNotExists).await.unwrap());
    }
}
