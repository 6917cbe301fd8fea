//! Media-group buffer: dedup, batching, flush, cleanup sweep, and
//! restart persistence over `bot-kv`/`bot-lock`.

pub mod buffer;
pub mod config;
pub mod error;
pub mod record;

pub use buffer::{AddOutcome, AddReason, FlushOutcome, GroupStatusEntry, MediaGroupBuffer};
pub use config::BufferConfig;
pub use error::{BufferError, Result};
pub use record::{BufferSnapshot, BufferedMessage, GroupMeta, SnapshotEntry, TimerEntry};
