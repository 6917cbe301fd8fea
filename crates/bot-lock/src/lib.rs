//! Lease-based distributed lock manager built over `bot-kv`'s CAS
//! transport: acquisition with stealing, heartbeat renewal, an
//! expired-lock sweeper, and the full named-lock contract.

pub mod config;
pub mod error;
pub mod manager;
pub mod record;

pub use config::LockManagerConfig;
pub use error::{LockError, Result};
pub use manager::{AcquireOptions, AcquireSuccess, LockManager, LockStatus};
pub use record::LockRecord;
