// Error types for the execution engine

use thiserror::Error;

/// Offload and lifecycle failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Blocking worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("Blocking pool is shut down")]
    PoolShutdown,

    #[error("Blocking pool error: {0}")]
    Blocking(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Reasons a single fetch attempt failed
///
/// Everything except `Decode` is transient and retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Failed to read body: {0}")]
    Body(String),

    #[error("Failed to decode body: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, FetchError::Decode(_))
    }
}
