//! Message authentication codes.
//!
//! HMAC and CMAC take a reusable caller-supplied key. Poly1305 keys must
//! never authenticate two messages, so Poly1305 is only reachable through
//! [`OneTimeKey`], whose `compute`/`verify` consume the key.
//!
//! Verification never hands the recomputed tag back to the caller and never
//! logs it; all comparisons are constant-time.

use std::fmt;

use aes::{Aes128, Aes192, Aes256};
use cmac::Cmac;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use poly1305::Poly1305;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};
use crate::provider::{CipherKind, HashAlgorithm, ct_eq, random_array};

pub const POLY1305_KEY_SIZE: usize = 32;
pub const POLY1305_TAG_SIZE: usize = 16;

/// MAC construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "with")]
pub enum MacAlgorithm {
    Hmac(HashAlgorithm),
    Cmac(CipherKind),
    Poly1305,
}

impl fmt::Display for MacAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hmac(hash) => write!(f, "HMAC-{hash}"),
            Self::Cmac(cipher) => write!(f, "CMAC-{cipher}"),
            Self::Poly1305 => f.write_str("Poly1305"),
        }
    }
}

/// An authentication tag.
#[derive(Clone, PartialEq, Eq)]
pub struct Tag(Vec<u8>);

impl Tag {
    /// Wrap a received tag for verification.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", hex::encode(&self.0))
    }
}

/// Compute a tag over `message` with a reusable key.
pub fn compute(key: &[u8], message: &[u8], algorithm: MacAlgorithm) -> Result<Tag> {
    let bytes = match algorithm {
        MacAlgorithm::Hmac(hash) => {
            note_short_hmac_key(key, hash);
            let expected = hash.output_size();
            match hash {
                HashAlgorithm::Sha256 => finalize(keyed::<Hmac<Sha256>>(key, expected)?, message),
                HashAlgorithm::Sha384 => finalize(keyed::<Hmac<Sha384>>(key, expected)?, message),
                HashAlgorithm::Sha512 => finalize(keyed::<Hmac<Sha512>>(key, expected)?, message),
            }
        }
        MacAlgorithm::Cmac(cipher) => {
            let expected = cipher.key_len();
            match cipher {
                CipherKind::Aes128 => finalize(keyed::<Cmac<Aes128>>(key, expected)?, message),
                CipherKind::Aes192 => finalize(keyed::<Cmac<Aes192>>(key, expected)?, message),
                CipherKind::Aes256 => finalize(keyed::<Cmac<Aes256>>(key, expected)?, message),
                CipherKind::ChaCha20 => return Err(cmac_needs_block_cipher()),
            }
        }
        MacAlgorithm::Poly1305 => return Err(CryptoError::OneTimeKeyRequired),
    };
    Ok(Tag(bytes))
}

/// Check `tag` over `message` with a reusable key.
pub fn verify(key: &[u8], message: &[u8], tag: &Tag, algorithm: MacAlgorithm) -> Result<()> {
    let tag = tag.as_bytes();
    let matched = match algorithm {
        MacAlgorithm::Hmac(hash) => {
            note_short_hmac_key(key, hash);
            let expected = hash.output_size();
            match hash {
                HashAlgorithm::Sha256 => check(keyed::<Hmac<Sha256>>(key, expected)?, message, tag),
                HashAlgorithm::Sha384 => check(keyed::<Hmac<Sha384>>(key, expected)?, message, tag),
                HashAlgorithm::Sha512 => check(keyed::<Hmac<Sha512>>(key, expected)?, message, tag),
            }
        }
        MacAlgorithm::Cmac(cipher) => {
            let expected = cipher.key_len();
            match cipher {
                CipherKind::Aes128 => check(keyed::<Cmac<Aes128>>(key, expected)?, message, tag),
                CipherKind::Aes192 => check(keyed::<Cmac<Aes192>>(key, expected)?, message, tag),
                CipherKind::Aes256 => check(keyed::<Cmac<Aes256>>(key, expected)?, message, tag),
                CipherKind::ChaCha20 => return Err(cmac_needs_block_cipher()),
            }
        }
        MacAlgorithm::Poly1305 => return Err(CryptoError::OneTimeKeyRequired),
    };
    if matched {
        Ok(())
    } else {
        tracing::warn!(%algorithm, "MAC verification failed");
        Err(CryptoError::TagMismatch)
    }
}

fn note_short_hmac_key(key: &[u8], hash: HashAlgorithm) {
    if key.len() < hash.output_size() {
        tracing::debug!(%hash, key_len = key.len(), "HMAC key shorter than digest size");
    }
}

const fn cmac_needs_block_cipher() -> CryptoError {
    CryptoError::UnsupportedCipher("CMAC requires a block cipher, got ChaCha20")
}

fn keyed<M: Mac + KeyInit>(key: &[u8], expected: usize) -> Result<M> {
    <M as KeyInit>::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected,
        actual: key.len(),
    })
}

fn finalize<M: Mac>(mut mac: M, message: &[u8]) -> Vec<u8> {
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn check<M: Mac>(mut mac: M, message: &[u8], tag: &[u8]) -> bool {
    mac.update(message);
    mac.verify_slice(tag).is_ok()
}

/// A single-use Poly1305 key.
///
/// Not `Clone`: `compute` and `verify` take `self`, so the type system stops
/// one key from authenticating two messages.
pub struct OneTimeKey(Zeroizing<[u8; POLY1305_KEY_SIZE]>);

impl fmt::Debug for OneTimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OneTimeKey([REDACTED])")
    }
}

impl OneTimeKey {
    /// Fresh random key from the OS CSPRNG.
    pub fn generate() -> Result<Self> {
        Ok(Self(Zeroizing::new(random_array()?)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != POLY1305_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: POLY1305_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key = Zeroizing::new([0u8; POLY1305_KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Authenticate `message`, consuming the key.
    pub fn compute(self, message: &[u8]) -> Tag {
        Tag(self.raw_tag(message).to_vec())
    }

    /// Verify `tag` over `message`, consuming the key.
    pub fn verify(self, message: &[u8], tag: &Tag) -> Result<()> {
        let expected = self.raw_tag(message);
        if ct_eq(expected.as_slice(), tag.as_bytes()) {
            Ok(())
        } else {
            tracing::warn!("Poly1305 verification failed");
            Err(CryptoError::TagMismatch)
        }
    }

    fn raw_tag(&self, message: &[u8]) -> poly1305::Tag {
        let mac = Poly1305::new(poly1305::Key::from_slice(self.0.as_ref()));
        mac.compute_unpadded(message)
    }
}
