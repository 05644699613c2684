use thiserror::Error;

use crate::types::EngineState;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine {0} is not registered")]
    NotRegistered(String),

    #[error("engine {0} is already registered")]
    DuplicateId(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("engine is {actual}, expected {expected}")]
    IllegalState {
        expected: &'static str,
        actual: EngineState,
    },

    #[error("failed to spawn engine process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("timed out waiting for uciok")]
    HandshakeTimeout,

    #[error("timed out waiting for readyok")]
    IsReadyTimeout,

    #[error("engine exited unexpectedly: {0}")]
    UnexpectedExit(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to write to engine: {0}")]
    WriteFailed(#[source] std::io::Error),
}
