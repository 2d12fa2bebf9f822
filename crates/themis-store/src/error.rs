//! Error types for themis-store.

use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The store is unreachable or failed a health probe.
    ///
    /// This is the kind the durability layer branches on: it triggers the
    /// in-memory fallback path instead of surfacing to API callers.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// SQLite database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization / deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Tenant store creation or initialization failed
    #[error("tenant init failed for '{organization}': {message}")]
    TenantInit {
        /// Organization whose store could not be set up
        organization: String,
        /// What went wrong
        message: String,
    },

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// General internal error
    #[error("{0}")]
    Internal(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
