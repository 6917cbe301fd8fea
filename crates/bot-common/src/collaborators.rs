//! Capability traits for the external collaborators the coordination core
//! consumes. None of these are implemented here — the chat platform
//! integration, cloud-drive adapters, and task execution engine are out
//! of scope; only the interface the core depends on is defined.

use crate::error::Result;
use crate::ids::LockVersion;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Downstream work queue the media-group buffer dispatches completed
/// batches to, and that callers use to manage individual task lifecycle.
#[async_trait]
pub trait TaskEngine: Send + Sync + 'static {
    /// Enqueue a batch of grouped messages for a single target/user.
    async fn add_batch(&self, target: &str, messages: Vec<Value>, user_id: &str) -> Result<Vec<String>>;

    /// Enqueue a single ungrouped message.
    async fn add_single(&self, target: &str, message: Value, user_id: &str) -> Result<String>;

    /// Cancel a previously enqueued task.
    async fn cancel(&self, task_id: &str, user_id: &str) -> Result<bool>;

    /// Number of tasks currently waiting to run.
    async fn waiting_count(&self) -> usize;

    /// Number of tasks currently executing.
    async fn processing_count(&self) -> usize;
}

/// Outbound system-event publisher used by the instance coordinator's
/// `broadcast`.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publish a system event; failures are logged and swallowed by the
    /// caller, never propagated past the coordinator boundary.
    async fn broadcast_system_event(&self, event: &str, payload: Value) -> Result<()>;
}

/// Role/permission lookups the core never has to reason about itself.
#[async_trait]
pub trait IdentityStore: Send + Sync + 'static {
    async fn get_role(&self, user_id: &str) -> Result<String>;
    async fn can(&self, user_id: &str, action: &str) -> Result<bool>;
}

/// Arbitrary per-key settings storage, external to the coordination state.
#[async_trait]
pub trait SettingsStore: Send + Sync + 'static {
    async fn get(&self, key: &str, default: Value) -> Value;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Monotonic clock capability, injected so tests can control time instead
/// of sleeping in real time.
pub trait Clock: Send + Sync + 'static {
    /// Wall-clock time, used for TTL comparisons against KV records.
    fn now(&self) -> DateTime<Utc>;
}

/// Real-time clock backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Unpredictable token generator, used for lock fence tokens. Injectable
/// so tests can assert on a deterministic sequence of tokens.
pub trait Random: Send + Sync + 'static {
    fn lock_version(&self) -> LockVersion;
}

/// Cryptographically unpredictable token generator backed by `rand`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRandom;

impl Random for SystemRandom {
    fn lock_version(&self) -> LockVersion {
        LockVersion::generate()
    }
}
