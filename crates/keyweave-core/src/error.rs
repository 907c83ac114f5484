//! Error types for the keyweave core library.

use keyweave_crypto::CryptoError;
use thiserror::Error;

/// Result type alias using keyweave `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for keyweave operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Handshake, transport or primitive failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
