//! Primitive provider boundary.
//!
//! Everything below the handshake and transport layers comes from vetted
//! RustCrypto / dalek crates. This module is the narrow interface the rest
//! of the crate uses for entropy, constant-time comparison and the
//! hash/cipher families that can be selected by configuration.

use std::fmt;

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

use crate::error::{CryptoError, Result};

/// Fill `buf` from the operating system CSPRNG.
pub fn random_bytes(buf: &mut [u8]) -> Result<()> {
    random_bytes_from_rng(&mut OsRng, buf)
}

/// Fill `buf` from a caller-supplied CSPRNG.
///
/// Uses `try_fill_bytes` so an unavailable entropy source surfaces as
/// [`CryptoError::RngFailure`] instead of a panic.
pub fn random_bytes_from_rng<R>(rng: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: RngCore + CryptoRng + ?Sized,
{
    rng.try_fill_bytes(buf).map_err(|e| {
        tracing::error!(error = %e, "entropy source failed");
        CryptoError::RngFailure
    })
}

/// Return `N` fresh random bytes from the OS CSPRNG.
pub fn random_array<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    random_bytes(&mut out)?;
    Ok(out)
}

/// Constant-time equality. Slices of different length compare unequal.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Hash functions available to HKDF, HMAC and transcript hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Digest size in bytes.
    pub const fn output_size(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    /// One-shot digest of `data`.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Symmetric cipher families.
///
/// CMAC only accepts block ciphers; the stream cipher is listed so that
/// callers can express (and get rejected for) the mismatch explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherKind {
    Aes128,
    Aes192,
    Aes256,
    #[serde(rename = "chacha20")]
    ChaCha20,
}

impl CipherKind {
    pub const fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 | Self::ChaCha20 => 32,
        }
    }

    pub const fn is_block_cipher(self) -> bool {
        !matches!(self, Self::ChaCha20)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Aes128 => "AES-128",
            Self::Aes192 => "AES-192",
            Self::Aes256 => "AES-256",
            Self::ChaCha20 => "ChaCha20",
        }
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An RNG whose `try_fill_bytes` always fails, for exercising `RngFailure`.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct FailingRng;

#[cfg(any(test, feature = "test-utils"))]
impl RngCore for FailingRng {
    fn next_u32(&mut self) -> u32 {
        0
    }

    fn next_u64(&mut self) -> u64 {
        0
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0);
    }

    fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        Err(rand::Error::new("entropy source unavailable"))
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl CryptoRng for FailingRng {}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn random_array_is_not_constant() {
        let a: [u8; 32] = random_array().unwrap();
        let b: [u8; 32] = random_array().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn failing_rng_reports_rng_failure() {
        let mut buf = [0u8; 16];
        let result = random_bytes_from_rng(&mut FailingRng, &mut buf);
        assert!(matches!(result, Err(CryptoError::RngFailure)));
    }

    #[test]
    fn ct_eq_matches_and_rejects() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"abcd"));
        assert!(ct_eq(b"", b""));
    }

    #[test]
    fn digest_sizes_match_output_size() {
        for hash in [
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            assert_eq!(hash.digest(b"abc").len(), hash.output_size());
        }
    }

    #[test]
    fn sha256_incremental_and_one_shot_agree() {
        // "abc" then "123", as fed incrementally.
        let mut hasher = Sha256::new();
        hasher.update(b"abc");
        hasher.update(b"123");
        let incremental = hasher.finalize().to_vec();
        assert_eq!(incremental, HashAlgorithm::Sha256.digest(b"abc123"));
    }

    #[test]
    fn chacha20_is_not_a_block_cipher() {
        assert!(!CipherKind::ChaCha20.is_block_cipher());
        assert!(CipherKind::Aes192.is_block_cipher());
    }

    #[test]
    fn hash_algorithm_serde_names() {
        let json = serde_json::to_string(&HashAlgorithm::Sha384).unwrap();
        assert_eq!(json, "\"sha384\"");
        let json = serde_json::to_string(&CipherKind::ChaCha20).unwrap();
        assert_eq!(json, "\"chacha20\"");
    }
}
