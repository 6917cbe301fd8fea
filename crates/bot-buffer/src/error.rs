//! Media-group buffer error types.

use bot_common::CoreError;
use bot_kv::KvError;
use bot_lock::LockError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BufferError>;

#[derive(Error, Debug, Clone)]
pub enum BufferError {
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("transport error: {0}")]
    Transport(#[from] KvError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("task engine error: {0}")]
    Engine(String),
}

impl From<BufferError> for CoreError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Lock(e) => e.into(),
            BufferError::Transport(e) => e.into(),
            BufferError::Serialization(s) => CoreError::Internal(s),
            BufferError::Engine(s) => CoreError::Transient(s),
        }
    }
}

impl From<serde_json::Error> for BufferError {
    fn from(err: serde_json::Error) -> Self {
        BufferError::Serialization(err.to_string())
    }
}
