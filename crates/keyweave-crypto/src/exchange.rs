//! Key exchange engine.
//!
//! Generates ephemeral X25519 / X448 key pairs and performs the raw
//! Diffie-Hellman step. A key pair's private scalar is consumed by its first
//! exchange; the resulting [`SharedSecret`] is meant to be handed straight
//! to the key derivation stage and dropped.

use std::fmt;

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};
use crate::identity::fingerprint_of;
use crate::provider::random_bytes_from_rng;

/// X25519 scalar / point / shared secret size.
pub const X25519_KEY_SIZE: usize = 32;

/// X448 scalar / point / shared secret size.
pub const X448_KEY_SIZE: usize = 56;

/// Curve family used for key agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Curve {
    #[default]
    X25519,
    X448,
}

impl Curve {
    pub const fn public_key_len(self) -> usize {
        match self {
            Self::X25519 => X25519_KEY_SIZE,
            Self::X448 => X448_KEY_SIZE,
        }
    }

    pub const fn shared_secret_len(self) -> usize {
        self.public_key_len()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::X25519 => "X25519",
            Self::X448 => "X448",
        }
    }

    /// Stable single-byte identifier, used in the handshake transcript.
    pub(crate) const fn id(self) -> u8 {
        match self {
            Self::X25519 => 1,
            Self::X448 => 2,
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A public point tagged with its curve.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    curve: Curve,
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Parse a peer's public key for `curve`.
    ///
    /// Wrong-length input (including a key from the other curve family) is
    /// rejected as [`CryptoError::InvalidPeerKey`].
    pub fn from_bytes(curve: Curve, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != curve.public_key_len() {
            return Err(CryptoError::InvalidPeerKey);
        }
        if curve == Curve::X448 && x448::PublicKey::from_bytes(bytes).is_none() {
            return Err(CryptoError::InvalidPeerKey);
        }
        Ok(Self {
            curve,
            bytes: bytes.to_vec(),
        })
    }

    pub const fn curve(&self) -> Curve {
        self.curve
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Colon-separated SHA-256 fingerprint of the encoded point.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("curve", &self.curve)
            .field("bytes", &hex::encode(&self.bytes))
            .finish()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.curve, hex::encode(&self.bytes))
    }
}

enum PrivateScalar {
    X25519(StaticSecret),
    X448(Zeroizing<[u8; X448_KEY_SIZE]>),
}

impl PrivateScalar {
    fn diffie_hellman(&self, peer: &PublicKey) -> Result<SharedSecret> {
        match self {
            Self::X25519(secret) => {
                let mut arr = [0u8; X25519_KEY_SIZE];
                arr.copy_from_slice(peer.as_bytes());
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(arr));
                // Low-order peer points force an all-zero output.
                if !shared.was_contributory() {
                    return Err(CryptoError::InvalidPeerKey);
                }
                Ok(SharedSecret::new(Curve::X25519, shared.as_bytes()))
            }
            Self::X448(scalar) => {
                let mut point = Zeroizing::new([0u8; X448_KEY_SIZE]);
                point.copy_from_slice(peer.as_bytes());
                // `x448::Secret` is never wiped, so only the free function
                // is used and every copy lives in a `Zeroizing` buffer.
                let shared = x448::x448(**scalar, *point)
                    .map(Zeroizing::new)
                    .ok_or(CryptoError::InvalidPeerKey)?;
                Ok(SharedSecret::new(Curve::X448, shared.as_ref()))
            }
        }
    }
}

/// An ephemeral key pair, good for exactly one exchange.
pub struct KeyPair {
    public: PublicKey,
    secret: Option<PrivateScalar>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

impl KeyPair {
    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub const fn curve(&self) -> Curve {
        self.public.curve
    }

    /// Whether the private scalar has already been used by an exchange.
    pub const fn is_consumed(&self) -> bool {
        self.secret.is_none()
    }

    fn take_secret(&mut self) -> Result<PrivateScalar> {
        self.secret.take().ok_or(CryptoError::KeyReuseViolation)
    }
}

/// Raw Diffie-Hellman output. Zeroized on drop; never serialized.
pub struct SharedSecret {
    curve: Curve,
    bytes: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret")
            .field("curve", &self.curve)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl SharedSecret {
    fn new(curve: Curve, bytes: &[u8]) -> Self {
        Self {
            curve,
            bytes: Zeroizing::new(bytes.to_vec()),
        }
    }

    /// Wrap raw bytes as a shared secret, e.g. for known-answer tests.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn from_bytes(curve: Curve, bytes: &[u8]) -> Self {
        Self::new(curve, bytes)
    }

    pub const fn curve(&self) -> Curve {
        self.curve
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Drives Diffie-Hellman rounds for one curve family.
///
/// Peer keys and key pairs from the other family are rejected with
/// [`CryptoError::CurveMismatch`].
#[derive(Debug, Clone, Copy)]
pub struct KeyExchangeEngine {
    curve: Curve,
}

impl KeyExchangeEngine {
    pub const fn new(curve: Curve) -> Self {
        Self { curve }
    }

    pub const fn curve(&self) -> Curve {
        self.curve
    }

    /// Generate a fresh ephemeral key pair from the OS CSPRNG.
    pub fn generate_keypair(&self) -> Result<KeyPair> {
        self.generate_keypair_from_rng(&mut OsRng)
    }

    /// Generate a fresh ephemeral key pair from `rng`.
    pub fn generate_keypair_from_rng<R>(&self, rng: &mut R) -> Result<KeyPair>
    where
        R: RngCore + CryptoRng,
    {
        let mut seed = Zeroizing::new(vec![0u8; self.curve.public_key_len()]);
        random_bytes_from_rng(rng, &mut seed)?;
        self.keypair_from_secret_bytes(&seed)
    }

    /// Build a key pair from raw scalar bytes (clamped by the curve library).
    pub fn keypair_from_secret_bytes(&self, bytes: &[u8]) -> Result<KeyPair> {
        let expected = self.curve.public_key_len();
        if bytes.len() != expected {
            return Err(CryptoError::InvalidKeyLength {
                expected,
                actual: bytes.len(),
            });
        }
        let (secret, public_bytes) = match self.curve {
            Curve::X25519 => {
                let mut arr = Zeroizing::new([0u8; X25519_KEY_SIZE]);
                arr.copy_from_slice(bytes);
                let secret = StaticSecret::from(*arr);
                let public = x25519_dalek::PublicKey::from(&secret);
                (PrivateScalar::X25519(secret), public.as_bytes().to_vec())
            }
            Curve::X448 => {
                let mut scalar = Zeroizing::new([0u8; X448_KEY_SIZE]);
                scalar.copy_from_slice(bytes);
                let public = x448::x448_unchecked(*scalar, x448::X448_BASEPOINT_BYTES);
                (PrivateScalar::X448(scalar), public.to_vec())
            }
        };
        Ok(KeyPair {
            public: PublicKey {
                curve: self.curve,
                bytes: public_bytes,
            },
            secret: Some(secret),
        })
    }

    /// Perform Diffie-Hellman between `own` and `peer`.
    ///
    /// The private scalar of `own` is moved out and dropped (zeroized) before
    /// this returns, whether or not the exchange succeeds. A second call with
    /// the same key pair fails with [`CryptoError::KeyReuseViolation`].
    pub fn exchange(&self, own: &mut KeyPair, peer: &PublicKey) -> Result<SharedSecret> {
        if own.is_consumed() {
            return Err(CryptoError::KeyReuseViolation);
        }
        self.check_curve(own.curve())?;
        self.check_curve(peer.curve())?;
        let secret = own.take_secret()?;
        let shared = secret.diffie_hellman(peer);
        if shared.is_err() {
            tracing::debug!(curve = %self.curve, "peer public key rejected");
        }
        shared
    }

    fn check_curve(&self, actual: Curve) -> Result<()> {
        if actual == self.curve {
            Ok(())
        } else {
            Err(CryptoError::CurveMismatch {
                expected: self.curve.name(),
                actual: actual.name(),
            })
        }
    }
}

/// Run one full exchange between two fresh key pairs and return both sides'
/// shared secrets.
///
/// This is a convenience function mainly useful for testing. In production,
/// each side generates a `KeyPair`, sends its public key, and calls
/// [`KeyExchangeEngine::exchange`] with the peer's.
#[cfg(any(test, feature = "test-utils"))]
pub fn perform_key_exchange(curve: Curve) -> Result<(SharedSecret, SharedSecret)> {
    let engine = KeyExchangeEngine::new(curve);
    let mut client = engine.generate_keypair()?;
    let mut server = engine.generate_keypair()?;
    let client_pub = client.public_key().clone();
    let server_pub = server.public_key().clone();

    let client_shared = engine.exchange(&mut client, &server_pub)?;
    let server_shared = engine.exchange(&mut server, &client_pub)?;
    Ok((client_shared, server_shared))
}
