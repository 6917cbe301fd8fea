//! Shared types for the distributed coordination core: a closed error
//! enum, newtype identifiers, and the capability traits for the external
//! collaborators the core depends on (chat platform, task engine,
//! identity/settings stores, clock, randomness).

pub mod collaborators;
pub mod error;
pub mod ids;

pub use collaborators::{Clock, IdentityStore, MessageBus, Random, SettingsStore, SystemClock, SystemRandom, TaskEngine};
pub use error::{CoreError, Result};
pub use ids::{GroupId, InstanceId, LockName, LockVersion, MessageId};
