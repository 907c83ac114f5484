//! Confidentiality-only ciphers, and an authenticated composition of one.
//!
//! [`ChaCha20Stream`] and [`AesCbc`] hide content but do not detect
//! tampering. They are deliberately separate types from
//! [`AeadTransport`](crate::transport::AeadTransport): nothing here returns a
//! tag or claims integrity. [`EncryptThenMac`] pairs AES-CBC with
//! HMAC-SHA-256 for callers that need authentication without an AEAD mode.

use std::fmt;

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chacha20::cipher::{StreamCipher, StreamCipherSeek};
use chacha20::{ChaCha20, Key, Nonce};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};
use crate::kdf::KeyDerivation;
use crate::mac::{self, MacAlgorithm};
use crate::provider::{CipherKind, HashAlgorithm, ct_eq, random_array};
use crate::transport::{Sealed, TAG_SIZE};

pub const CHACHA20_KEY_SIZE: usize = 32;
pub const CHACHA20_NONCE_SIZE: usize = 12;
/// 4-byte little-endian block counter followed by a 12-byte nonce.
pub const CHACHA20_EXTENDED_NONCE_SIZE: usize = 16;

pub const AES_BLOCK_SIZE: usize = 16;
pub const CBC_IV_SIZE: usize = AES_BLOCK_SIZE;

const CHACHA20_BLOCK_SIZE: u64 = 64;

const ETM_KEY_SIZE: usize = 32;
const ETM_ENC_INFO: &[u8] = b"keyweave etm encryption";
const ETM_MAC_INFO: &[u8] = b"keyweave etm authentication";

/// ChaCha20 keystream cipher. Provides confidentiality only.
pub struct ChaCha20Stream {
    key: Zeroizing<[u8; CHACHA20_KEY_SIZE]>,
}

impl fmt::Debug for ChaCha20Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChaCha20Stream")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl ChaCha20Stream {
    pub fn new(key: &[u8]) -> Result<Self> {
        let key = <[u8; CHACHA20_KEY_SIZE]>::try_from(key).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: CHACHA20_KEY_SIZE,
                actual: key.len(),
            }
        })?;
        Ok(Self {
            key: Zeroizing::new(key),
        })
    }

    /// XOR the keystream into `data` in place. Encryption and decryption are
    /// the same operation.
    ///
    /// `nonce` is either a 12-byte IETF nonce (block counter 0) or 16 bytes
    /// of little-endian initial counter followed by the 12-byte nonce.
    pub fn apply_keystream(&self, nonce: &[u8], data: &mut [u8]) -> Result<()> {
        let (counter, nonce) = match nonce.len() {
            CHACHA20_NONCE_SIZE => (0u32, nonce),
            CHACHA20_EXTENDED_NONCE_SIZE => {
                let (counter, rest) = nonce.split_at(4);
                let mut le = [0u8; 4];
                le.copy_from_slice(counter);
                (u32::from_le_bytes(le), rest)
            }
            actual => {
                return Err(CryptoError::InvalidNonceLength {
                    expected: CHACHA20_NONCE_SIZE,
                    actual,
                });
            }
        };

        let mut cipher = ChaCha20::new(Key::from_slice(&*self.key), Nonce::from_slice(nonce));
        cipher.seek(u64::from(counter) * CHACHA20_BLOCK_SIZE);
        cipher
            .try_apply_keystream(data)
            .map_err(|_| CryptoError::EncryptionFailed("ChaCha20 keystream exhausted".to_string()))
    }

    /// Copying form of [`apply_keystream`](Self::apply_keystream).
    pub fn process(&self, nonce: &[u8], input: &[u8]) -> Result<Vec<u8>> {
        let mut out = input.to_vec();
        self.apply_keystream(nonce, &mut out)?;
        Ok(out)
    }
}

/// AES key size accepted by [`AesCbc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AesKeySize {
    Aes128,
    Aes192,
    Aes256,
}

impl AesKeySize {
    pub const fn from_key_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(Self::Aes128),
            24 => Some(Self::Aes192),
            32 => Some(Self::Aes256),
            _ => None,
        }
    }

    pub const fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }
}

impl From<AesKeySize> for CipherKind {
    fn from(size: AesKeySize) -> Self {
        match size {
            AesKeySize::Aes128 => Self::Aes128,
            AesKeySize::Aes192 => Self::Aes192,
            AesKeySize::Aes256 => Self::Aes256,
        }
    }
}

/// AES in CBC mode with PKCS#7 padding. Provides confidentiality only.
pub struct AesCbc {
    size: AesKeySize,
    key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for AesCbc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesCbc")
            .field("cipher", &CipherKind::from(self.size))
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl AesCbc {
    /// Accepts 16, 24 or 32-byte keys.
    pub fn new(key: &[u8]) -> Result<Self> {
        let size = AesKeySize::from_key_len(key.len()).ok_or(CryptoError::InvalidKeyLength {
            expected: AesKeySize::Aes256.key_len(),
            actual: key.len(),
        })?;
        Ok(Self {
            size,
            key: Zeroizing::new(key.to_vec()),
        })
    }

    pub const fn key_size(&self) -> AesKeySize {
        self.size
    }

    /// A fresh random IV. CBC needs IVs that are unpredictable, not merely
    /// unique.
    pub fn generate_iv() -> Result<[u8; CBC_IV_SIZE]> {
        random_array()
    }

    pub fn encrypt(&self, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        check_iv(iv)?;
        let key = self.key.as_slice();
        let out = match self.size {
            AesKeySize::Aes128 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            AesKeySize::Aes192 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            AesKeySize::Aes256 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        };
        out.map_err(|_| CryptoError::EncryptionFailed("AES-CBC key setup failed".to_string()))
    }

    /// Decrypt and strip padding.
    ///
    /// Bad padding and non-block-aligned input both surface as the same
    /// [`CryptoError::DecryptionFailed`].
    pub fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        check_iv(iv)?;
        if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
            return Err(CryptoError::DecryptionFailed);
        }
        let key = self.key.as_slice();
        let out = match self.size {
            AesKeySize::Aes128 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
                .map(|c| c.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)),
            AesKeySize::Aes192 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
                .map(|c| c.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)),
            AesKeySize::Aes256 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
                .map(|c| c.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)),
        };
        match out {
            Ok(Ok(plaintext)) => Ok(plaintext),
            _ => Err(CryptoError::DecryptionFailed),
        }
    }
}

fn check_iv(iv: &[u8]) -> Result<()> {
    if iv.len() == CBC_IV_SIZE {
        Ok(())
    } else {
        Err(CryptoError::InvalidNonceLength {
            expected: CBC_IV_SIZE,
            actual: iv.len(),
        })
    }
}

/// AES-256-CBC then HMAC-SHA-256, truncated to a 16-byte tag.
///
/// Encryption and MAC sub-keys are split from one 32-byte key with HKDF.
/// The tag covers the associated data length, the associated data, the IV
/// and the ciphertext, and is checked before any decryption happens.
pub struct EncryptThenMac {
    cbc: AesCbc,
    mac_key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for EncryptThenMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptThenMac")
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

impl EncryptThenMac {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != ETM_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: ETM_KEY_SIZE,
                actual: key.len(),
            });
        }
        let kdf = KeyDerivation::new(HashAlgorithm::Sha256);
        let enc_key = kdf.expand(key, ETM_KEY_SIZE, None, ETM_ENC_INFO)?;
        let mac_key = kdf.expand(key, ETM_KEY_SIZE, None, ETM_MAC_INFO)?;
        Ok(Self {
            cbc: AesCbc::new(&enc_key)?,
            mac_key,
        })
    }

    pub fn seal(&self, iv: &[u8], associated_data: &[u8], plaintext: &[u8]) -> Result<Sealed> {
        let ciphertext = self.cbc.encrypt(iv, plaintext)?;
        let tag = self.tag(iv, associated_data, &ciphertext)?;
        Ok(Sealed { ciphertext, tag })
    }

    pub fn open(
        &self,
        iv: &[u8],
        associated_data: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>> {
        check_iv(iv)?;
        let expected = self.tag(iv, associated_data, ciphertext)?;
        if !ct_eq(&expected, tag) {
            tracing::warn!("encrypt-then-MAC authentication failed");
            return Err(CryptoError::AuthenticationFailed);
        }
        self.cbc.decrypt(iv, ciphertext)
    }

    fn tag(&self, iv: &[u8], associated_data: &[u8], ciphertext: &[u8]) -> Result<[u8; TAG_SIZE]> {
        let ad_len = u64::try_from(associated_data.len())
            .map_err(|_| CryptoError::EncryptionFailed("associated data too long".to_string()))?;
        let mut input = Vec::with_capacity(8 + associated_data.len() + iv.len() + ciphertext.len());
        input.extend_from_slice(&ad_len.to_be_bytes());
        input.extend_from_slice(associated_data);
        input.extend_from_slice(iv);
        input.extend_from_slice(ciphertext);

        let full = mac::compute(
            &self.mac_key,
            &input,
            MacAlgorithm::Hmac(HashAlgorithm::Sha256),
        )?;
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&full.as_bytes()[..TAG_SIZE]);
        Ok(tag)
    }
}
