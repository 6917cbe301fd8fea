//! The provider capability trait: what a concrete KV backend must supply.
//!
//! Modeled as a trait object (`Arc<dyn KvBackend>`) rather than a class
//! hierarchy, per the "dynamic dispatch over drive providers" design note —
//! each concrete provider (Upstash, Cloudflare) implements this trait and
//! is selected at construction time through `KvProviderConfig`.

use crate::error::Result;
use async_trait::async_trait;

/// The condition under which a conditional write should succeed.
#[derive(Debug, Clone)]
pub enum CasCondition {
    /// Succeed only if the key currently has no value.
    IfNotExists,
    /// Succeed only if the key's current raw value equals the given string.
    IfEquals(String),
}

/// A provider capability for a single HTTP-accessible KV store.
///
/// All values are transported as raw strings; JSON encoding/decoding is
/// the transport layer's concern (`KvTransport`), not the backend's — this
/// mirrors how both Upstash's REST API and Cloudflare Workers KV actually
/// work (opaque string values at the wire level).
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    /// Provider tag used in logs and failover bookkeeping.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditional write. TTL is advisory — `None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()>;

    /// Conditional write. Returns `Ok(true)` on success, `Ok(false)` if
    /// the condition did not hold (a CAS conflict — not an error).
    async fn compare_and_set(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
        condition: CasCondition,
    ) -> Result<bool>;

    /// Returns `Ok(true)` if a key was actually deleted.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List all keys sharing the given prefix.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}
