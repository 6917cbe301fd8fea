//! Lock manager error types.

use bot_common::CoreError;
use bot_kv::KvError;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LockError>;

#[derive(Error, Debug, Clone)]
pub enum LockError {
    /// The lock is currently held by another owner and has not expired.
    #[error("lock held by {current_owner}")]
    Held {
        current_owner: String,
        expires_at: Option<DateTime<Utc>>,
    },

    /// Transport reported a CAS conflict while acquiring or renewing.
    #[error("CAS conflict on lock {0}")]
    CasConflict(String),

    /// The underlying transport failed in a way that exhausted retries.
    #[error("transport error: {0}")]
    Transport(#[from] KvError),

    /// The stored lock record could not be parsed.
    #[error("corrupt lock record for {0}: {1}")]
    CorruptRecord(String, String),
}

impl From<LockError> for CoreError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Held { current_owner, expires_at } => CoreError::LockHeld { current_owner, expires_at },
            LockError::CasConflict(s) => CoreError::CasConflict(s),
            LockError::Transport(kv_err) => kv_err.into(),
            LockError::CorruptRecord(name, reason) => CoreError::Internal(format!("{name}: {reason}")),
        }
    }
}
