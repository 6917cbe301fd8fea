//! Compare-and-set key-value transport with dual-provider failover and
//! an L1 in-memory cache. Everything above raw `String` values (JSON
//! encoding, locking semantics) lives in `KvTransport`; providers only
//! know how to talk to their own REST API.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod failover;
pub mod memory;
pub mod providers;
pub mod transport;

pub use backend::{CasCondition, KvBackend};
pub use config::{KvProviderConfig, KvTransportConfig, ProviderConfig};
pub use error::{KvError, Result};
pub use failover::SelectedProvider;
pub use memory::InMemoryBackend;
pub use providers::{CloudflareBackend, CloudflareConfig, UpstashBackend, UpstashConfig};
pub use transport::{CasOptions, KvTransport, KvValue, SetOptions, ValueKind};
