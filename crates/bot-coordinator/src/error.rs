//! Instance coordinator error types.

use bot_common::CoreError;
use bot_kv::KvError;
use bot_lock::LockError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Error, Debug, Clone)]
pub enum CoordinatorError {
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("transport error: {0}")]
    Transport(#[from] KvError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<CoordinatorError> for CoreError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Lock(e) => e.into(),
            CoordinatorError::Transport(e) => e.into(),
            CoordinatorError::Serialization(s) => CoreError::Internal(s),
        }
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(err: serde_json::Error) -> Self {
        CoordinatorError::Serialization(err.to_string())
    }
}
