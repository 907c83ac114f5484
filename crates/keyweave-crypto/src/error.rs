//! Crypto error types.
//!
//! Variants never carry key material, recomputed tags or plaintext; every
//! message is safe to log.

use crate::handshake::HandshakeState;

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Entropy source unavailable")]
    RngFailure,

    #[error("Invalid peer public key")]
    InvalidPeerKey,

    #[error("Curve mismatch: expected {expected}, got {actual}")]
    CurveMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Ephemeral key pair already consumed")]
    KeyReuseViolation,

    #[error("Requested output length {requested} exceeds HKDF maximum of {max} bytes")]
    OutputLengthExceeded { requested: usize, max: usize },

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("MAC tag mismatch")]
    TagMismatch,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Unsupported cipher for this operation: {0}")]
    UnsupportedCipher(&'static str),

    #[error("Poly1305 requires a single-use OneTimeKey")]
    OneTimeKeyRequired,

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("Nonce already used with this key")]
    NonceReuse,

    #[error("Nonce counter exhausted; transport must be rekeyed")]
    NonceExhausted,

    #[error("Handshake step not allowed in state {actual:?} (expected {expected})")]
    UnexpectedState {
        expected: &'static str,
        actual: HandshakeState,
    },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
