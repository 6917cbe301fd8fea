//! Graceful shutdown supervisor: a named hook DAG, task-drain polling,
//! and exit-code selection, built over `bot-common`'s collaborator
//! traits so it has no dependency on any one component's concrete type.

mod hook;
mod topo;

pub mod config;
pub mod error;
pub mod supervisor;

pub use config::ShutdownConfig;
pub use error::{Result, ShutdownError};
pub use hook::{HookFn, HookOptions, HookResult};
pub use supervisor::{is_recoverable, ShutdownOutcome, ShutdownSource, ShutdownSupervisor, TaskCounterFn};
