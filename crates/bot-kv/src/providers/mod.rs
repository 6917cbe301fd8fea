//! Concrete `KvBackend` implementations.

pub mod cloudflare;
pub mod upstash;

pub use cloudflare::{CloudflareBackend, CloudflareConfig};
pub use upstash::{UpstashBackend, UpstashConfig};
