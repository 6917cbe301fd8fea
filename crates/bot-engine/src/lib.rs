//! Composition root for the distributed coordination core: wires
//! `bot-kv`, `bot-lock`, `bot-coordinator`, `bot-buffer`, and
//! `bot-shutdown` into a single `CoordinationCore` value.

pub mod core;
pub mod telemetry;

pub use crate::core::{CoordinationCore, CoordinationCoreConfig};
