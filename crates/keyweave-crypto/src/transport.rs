//! AEAD transport keyed by a handshake-derived key.
//!
//! AES-GCM (128/192/256) and ChaCha20-Poly1305 with 12-byte nonces and
//! detached 16-byte tags. Every caller-supplied nonce sealed under a
//! transport is remembered; sealing twice with the same nonce fails with
//! [`CryptoError::NonceReuse`] instead of silently breaking the cipher.
//! Counter nonces from `seal_next` are unique by construction and skip the
//! ledger.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, Result};
use crate::kdf::DerivedKey;
use crate::provider::random_array;

/// AES-GCM and ChaCha20-Poly1305 nonce size.
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size for every AEAD mode here.
pub const TAG_SIZE: usize = 16;

type Aes192Gcm = AesGcm<aes::Aes192, U12>;

/// Authenticated cipher modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    #[serde(rename = "aes-128-gcm")]
    Aes128Gcm,
    #[serde(rename = "aes-192-gcm")]
    Aes192Gcm,
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl AeadAlgorithm {
    pub const fn key_len(self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes192Gcm => 24,
            Self::Aes256Gcm | Self::ChaCha20Poly1305 => 32,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Aes128Gcm => "AES-128-GCM",
            Self::Aes192Gcm => "AES-192-GCM",
            Self::Aes256Gcm => "AES-256-GCM",
            Self::ChaCha20Poly1305 => "ChaCha20-Poly1305",
        }
    }
}

impl fmt::Display for AeadAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ciphertext plus its detached tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

impl Cipher {
    fn new(algorithm: AeadAlgorithm, key: &[u8]) -> Result<Self> {
        let invalid = || CryptoError::InvalidKeyLength {
            expected: algorithm.key_len(),
            actual: key.len(),
        };
        Ok(match algorithm {
            AeadAlgorithm::Aes128Gcm => Self::Aes128(boxed(key).ok_or_else(invalid)?),
            AeadAlgorithm::Aes192Gcm => Self::Aes192(boxed(key).ok_or_else(invalid)?),
            AeadAlgorithm::Aes256Gcm => Self::Aes256(boxed(key).ok_or_else(invalid)?),
            AeadAlgorithm::ChaCha20Poly1305 => Self::ChaCha(boxed(key).ok_or_else(invalid)?),
        })
    }

    fn seal(&self, nonce: &[u8; NONCE_SIZE], ad: &[u8], buf: &mut [u8]) -> Option<[u8; TAG_SIZE]> {
        match self {
            Self::Aes128(c) => seal_detached(c.as_ref(), nonce, ad, buf),
            Self::Aes192(c) => seal_detached(c.as_ref(), nonce, ad, buf),
            Self::Aes256(c) => seal_detached(c.as_ref(), nonce, ad, buf),
            Self::ChaCha(c) => seal_detached(c.as_ref(), nonce, ad, buf),
        }
    }

    fn open(
        &self,
        nonce: &[u8; NONCE_SIZE],
        ad: &[u8],
        buf: &mut [u8],
        tag: &[u8; TAG_SIZE],
    ) -> bool {
        match self {
            Self::Aes128(c) => open_detached(c.as_ref(), nonce, ad, buf, tag),
            Self::Aes192(c) => open_detached(c.as_ref(), nonce, ad, buf, tag),
            Self::Aes256(c) => open_detached(c.as_ref(), nonce, ad, buf, tag),
            Self::ChaCha(c) => open_detached(c.as_ref(), nonce, ad, buf, tag),
        }
    }
}

fn boxed<C: KeyInit>(key: &[u8]) -> Option<Box<C>> {
    C::new_from_slice(key).ok().map(Box::new)
}

fn seal_detached<C>(
    cipher: &C,
    nonce: &[u8; NONCE_SIZE],
    ad: &[u8],
    buf: &mut [u8],
) -> Option<[u8; TAG_SIZE]>
where
    C: AeadInPlace + AeadCore<NonceSize = U12, TagSize = U16>,
{
    cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), ad, buf)
        .ok()
        .map(Into::into)
}

fn open_detached<C>(
    cipher: &C,
    nonce: &[u8; NONCE_SIZE],
    ad: &[u8],
    buf: &mut [u8],
    tag: &[u8; TAG_SIZE],
) -> bool
where
    C: AeadInPlace + AeadCore<NonceSize = U12, TagSize = U16>,
{
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            ad,
            buf,
            GenericArray::from_slice(tag),
        )
        .is_ok()
}

/// Authenticated encryption under one derived key.
///
/// `seal`/`open` take `&self`, so a transport can be shared across threads
/// behind an `Arc`. The nonce-reuse ledger is internally locked.
pub struct AeadTransport {
    algorithm: AeadAlgorithm,
    cipher: Cipher,
    used_nonces: Mutex<HashSet<[u8; NONCE_SIZE]>>,
    /// Random prefix for counter nonces (set once per transport).
    nonce_prefix: [u8; 8],
    nonce_counter: AtomicU32,
}

impl fmt::Debug for AeadTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AeadTransport")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .field("nonce_counter", &self.nonce_counter.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for AeadTransport {
    fn drop(&mut self) {
        self.nonce_prefix.zeroize();
    }
}

impl AeadTransport {
    /// Key a transport from a handshake-derived key.
    ///
    /// The key length must match `algorithm` exactly.
    pub fn new(key: &DerivedKey, algorithm: AeadAlgorithm) -> Result<Self> {
        let expected = algorithm.key_len();
        if key.len() != expected {
            return Err(CryptoError::InvalidKeyLength {
                expected,
                actual: key.len(),
            });
        }
        let cipher = Cipher::new(algorithm, key.as_bytes())?;
        tracing::debug!(%algorithm, round = %key.round(), "AEAD transport keyed");
        Ok(Self {
            algorithm,
            cipher,
            used_nonces: Mutex::new(HashSet::new()),
            nonce_prefix: random_array()?,
            nonce_counter: AtomicU32::new(0),
        })
    }

    pub const fn algorithm(&self) -> AeadAlgorithm {
        self.algorithm
    }

    /// Encrypt `plaintext` under a caller-chosen nonce.
    ///
    /// The nonce is recorded in this transport's ledger. Nonces ending in
    /// this transport's counter prefix are refused so they can never
    /// collide with one handed out by [`seal_next`](Self::seal_next).
    pub fn seal(&self, nonce: &[u8], associated_data: &[u8], plaintext: &[u8]) -> Result<Sealed> {
        let nonce = nonce_array(nonce)?;
        if nonce[4..] == self.nonce_prefix {
            tracing::warn!(algorithm = %self.algorithm, "caller nonce overlaps counter space");
            return Err(CryptoError::NonceReuse);
        }
        self.claim_nonce(&nonce)?;
        self.seal_with(&nonce, associated_data, plaintext)
    }

    /// Encrypt under the next counter nonce and return it with the result.
    ///
    /// Layout: [4-byte counter (big-endian)] [8-byte random prefix].
    /// The counter alone guarantees uniqueness, so these nonces are not
    /// added to the ledger. Returns `NonceExhausted` once the counter
    /// reaches `u32::MAX`; the transport must then be rekeyed from a fresh
    /// handshake.
    pub fn seal_next(
        &self,
        associated_data: &[u8],
        plaintext: &[u8],
    ) -> Result<([u8; NONCE_SIZE], Sealed)> {
        let nonce = self.next_nonce()?;
        let sealed = self.seal_with(&nonce, associated_data, plaintext)?;
        Ok((nonce, sealed))
    }

    /// Verify and decrypt.
    ///
    /// Decryption happens in a zeroizing scratch buffer. Plaintext leaves it
    /// only after the tag checks out; otherwise the buffer is wiped and
    /// `AuthenticationFailed` is returned.
    pub fn open(
        &self,
        nonce: &[u8],
        associated_data: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>> {
        let nonce = nonce_array(nonce)?;
        let Ok(tag) = <[u8; TAG_SIZE]>::try_from(tag) else {
            tracing::warn!(algorithm = %self.algorithm, "AEAD tag has wrong length");
            return Err(CryptoError::AuthenticationFailed);
        };

        let mut scratch = Zeroizing::new(ciphertext.to_vec());
        if self
            .cipher
            .open(&nonce, associated_data, &mut scratch, &tag)
        {
            Ok(std::mem::take(&mut *scratch))
        } else {
            tracing::warn!(algorithm = %self.algorithm, "AEAD authentication failed");
            Err(CryptoError::AuthenticationFailed)
        }
    }

    /// Open a [`Sealed`] value.
    pub fn open_sealed(
        &self,
        nonce: &[u8],
        associated_data: &[u8],
        sealed: &Sealed,
    ) -> Result<Vec<u8>> {
        self.open(nonce, associated_data, &sealed.ciphertext, &sealed.tag)
    }

    fn seal_with(
        &self,
        nonce: &[u8; NONCE_SIZE],
        associated_data: &[u8],
        plaintext: &[u8],
    ) -> Result<Sealed> {
        let mut ciphertext = plaintext.to_vec();
        let tag = self
            .cipher
            .seal(nonce, associated_data, &mut ciphertext)
            .ok_or_else(|| {
                ciphertext.zeroize();
                CryptoError::EncryptionFailed(format!("{} seal rejected input", self.algorithm))
            })?;
        Ok(Sealed { ciphertext, tag })
    }

    fn claim_nonce(&self, nonce: &[u8; NONCE_SIZE]) -> Result<()> {
        let mut used = self
            .used_nonces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if used.insert(*nonce) {
            Ok(())
        } else {
            tracing::warn!(algorithm = %self.algorithm, "refusing to reuse nonce");
            Err(CryptoError::NonceReuse)
        }
    }

    /// Uses compare-and-swap so concurrent callers never share or wrap a
    /// counter value.
    fn next_nonce(&self) -> Result<[u8; NONCE_SIZE]> {
        loop {
            let current = self.nonce_counter.load(Ordering::Relaxed);
            if current == u32::MAX {
                return Err(CryptoError::NonceExhausted);
            }
            if let Ok(prev) = self.nonce_counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                let mut nonce = [0u8; NONCE_SIZE];
                nonce[..4].copy_from_slice(&prev.to_be_bytes());
                nonce[4..].copy_from_slice(&self.nonce_prefix);
                return Ok(nonce);
            }
        }
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn nonce_counter(&self) -> u32 {
        self.nonce_counter.load(Ordering::Relaxed)
    }

    /// Number of caller-supplied nonces recorded so far.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn ledger_len(&self) -> usize {
        self.used_nonces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_nonce_counter(&self, value: u32) {
        self.nonce_counter.store(value, Ordering::Relaxed);
    }
}

fn nonce_array(nonce: &[u8]) -> Result<[u8; NONCE_SIZE]> {
    <[u8; NONCE_SIZE]>::try_from(nonce).map_err(|_| CryptoError::InvalidNonceLength {
        expected: NONCE_SIZE,
        actual: nonce.len(),
    })
}
