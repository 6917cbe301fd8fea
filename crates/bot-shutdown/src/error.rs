//! Shutdown supervisor error types — raised only at hook-registration time;
//! the shutdown sequence itself never fails, it only accumulates a report.

use bot_common::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShutdownError>;

#[derive(Error, Debug, Clone)]
pub enum ShutdownError {
    #[error("hook '{0}' is already registered")]
    DuplicateHook(String),

    #[error("shutdown hook dependency graph has a cycle involving: {0:?}")]
    CyclicDependency(Vec<String>),

    #[error("hook '{hook}' depends on unregistered hook '{dependency}'")]
    UnknownDependency { hook: String, dependency: String },
}

impl From<ShutdownError> for CoreError {
    fn from(err: ShutdownError) -> Self {
        CoreError::Configuration(err.to_string())
    }
}
