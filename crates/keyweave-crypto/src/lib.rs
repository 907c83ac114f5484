//! Keyweave cryptographic core.
//!
//! A two-round ephemeral Diffie-Hellman handshake whose derived keys feed
//! authenticated transport encryption.
//!
//! ## Pipeline
//!
//! - **Exchange**: ephemeral X25519 / X448 key pairs, each usable exactly once
//! - **Derivation**: HKDF (SHA-256/384/512) with per-round `info` separation
//! - **Handshake**: two rounds, fresh ephemerals per round, reset-on-error
//! - **Identity**: optional Ed25519 / Ed448 signatures over the handshake transcript
//! - **MAC**: HMAC, CMAC, and single-use Poly1305
//! - **Transport**: AES-GCM / ChaCha20-Poly1305 with nonce-reuse refusal
//! - **Stream**: confidentiality-only ChaCha20 and AES-CBC, plus encrypt-then-MAC
//! - **Frame**: `{nonce, ad_len, ad, ciphertext, tag}` wire layout

pub mod config;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod handshake;
pub mod identity;
pub mod kdf;
pub mod mac;
pub mod provider;
pub mod stream;
pub mod transport;

pub use config::{HandshakeConfig, TransportConfig};
pub use error::{CryptoError, Result};
#[cfg(any(test, feature = "test-utils"))]
pub use exchange::perform_key_exchange;
pub use exchange::{Curve, KeyExchangeEngine, KeyPair, PublicKey, SharedSecret};
pub use frame::{Frame, FrameLayout};
#[cfg(any(test, feature = "test-utils"))]
pub use handshake::perform_handshake;
pub use handshake::{HandshakeCoordinator, HandshakeKeys, HandshakeState, Role};
pub use identity::{
    Signature, SignatureScheme, SigningIdentity, VerifyingIdentity, fingerprint_of,
    verify_fingerprint,
};
pub use kdf::{DerivedKey, KeyDerivation, Round};
pub use mac::{MacAlgorithm, OneTimeKey, Tag};
pub use provider::{CipherKind, HashAlgorithm};
pub use stream::{AesCbc, AesKeySize, ChaCha20Stream, EncryptThenMac};
pub use transport::{AeadAlgorithm, AeadTransport, NONCE_SIZE, Sealed, TAG_SIZE};
