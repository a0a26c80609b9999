//! Error types for the Hearth hub

use thiserror::Error;

/// Result type alias for Hearth operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Hearth hub
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid plugin settings at initialize time
    #[error("configuration error: {0}")]
    Config(String),

    /// Non-2xx response or transport failure from an external backend
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Unknown or disabled plugin id, or missing capability
    #[error("routing error: {0}")]
    Routing(String),

    /// Plugin config store read/write failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
