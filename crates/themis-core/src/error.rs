//! Error types for themis-core.

use thiserror::Error;
use uuid::Uuid;

/// Runtime error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Write-through to the durable backend was attempted and rejected.
    ///
    /// Only surfaced on the healthy write-through path; the buffered
    /// fallback path never raises it back to the caller.
    #[error("durability write failed: {0}")]
    DurabilityWrite(String),

    /// Engine event referenced an execution this process has no record of.
    ///
    /// Logged and dropped by the registry; never fatal.
    #[error("unknown execution: {0}")]
    UnknownExecution(Uuid),

    /// Storage layer error
    #[error("store error: {0}")]
    Store(#[from] themis_store::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
