//! Key derivation stage.
//!
//! HKDF extract-then-expand over a configurable hash. The `info` string
//! separates keys derived from related secrets; it is context, not a secret,
//! and reusing the same `(salt, info)` across different shared secrets is
//! expected.

use std::fmt;

use hkdf::Hkdf;
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};
use crate::exchange::SharedSecret;
use crate::provider::{HashAlgorithm, ct_eq};

/// HKDF can expand to at most 255 hash blocks.
const HKDF_MAX_BLOCKS: usize = 255;

/// Which handshake round produced a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Round {
    One,
    Two,
}

impl Round {
    pub const fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// A symmetric key derived from one handshake round.
///
/// Immutable once derived and zeroized on drop. `Debug` and `Display` never
/// print the key bytes.
pub struct DerivedKey {
    round: Round,
    info: Vec<u8>,
    key: Zeroizing<Vec<u8>>,
}

impl DerivedKey {
    /// Wrap raw key bytes, e.g. for transport tests that skip the handshake.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn from_bytes(round: Round, info: &[u8], key: &[u8]) -> Self {
        Self {
            round,
            info: info.to_vec(),
            key: Zeroizing::new(key.to_vec()),
        }
    }

    pub const fn round(&self) -> Round {
        self.round
    }

    pub fn info(&self) -> &[u8] {
        &self.info
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// Constant-time comparison of the key bytes.
    pub fn ct_eq(&self, other: &Self) -> bool {
        ct_eq(&self.key, &other.key)
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("round", &self.round)
            .field("info", &String::from_utf8_lossy(&self.info))
            .field("len", &self.key.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round-{} key ({} bytes, info {:?})",
            self.round,
            self.key.len(),
            String::from_utf8_lossy(&self.info)
        )
    }
}

/// HKDF over a selectable hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDerivation {
    hash: HashAlgorithm,
}

impl KeyDerivation {
    pub const fn new(hash: HashAlgorithm) -> Self {
        Self { hash }
    }

    pub const fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    /// Largest `output_length` HKDF allows for this hash.
    pub const fn max_output_len(&self) -> usize {
        HKDF_MAX_BLOCKS * self.hash.output_size()
    }

    /// Derive a round key from a Diffie-Hellman shared secret.
    pub fn derive(
        &self,
        shared_secret: &SharedSecret,
        output_length: usize,
        salt: Option<&[u8]>,
        info: &[u8],
        round: Round,
    ) -> Result<DerivedKey> {
        let key = self.expand(shared_secret.as_bytes(), output_length, salt, info)?;
        tracing::debug!(
            %round,
            hash = %self.hash,
            output_length,
            "derived round key"
        );
        Ok(DerivedKey {
            round,
            info: info.to_vec(),
            key,
        })
    }

    /// HKDF extract-then-expand over arbitrary input keying material.
    ///
    /// The caller owns the returned bytes; they are zeroized on drop.
    pub fn expand(
        &self,
        ikm: &[u8],
        output_length: usize,
        salt: Option<&[u8]>,
        info: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let max = self.max_output_len();
        if output_length > max {
            return Err(CryptoError::OutputLengthExceeded {
                requested: output_length,
                max,
            });
        }

        let mut okm = Zeroizing::new(vec![0u8; output_length]);
        let expanded = match self.hash {
            HashAlgorithm::Sha256 => Hkdf::<Sha256>::new(salt, ikm).expand(info, &mut okm),
            HashAlgorithm::Sha384 => Hkdf::<Sha384>::new(salt, ikm).expand(info, &mut okm),
            HashAlgorithm::Sha512 => Hkdf::<Sha512>::new(salt, ikm).expand(info, &mut okm),
        };
        expanded.map_err(|_| CryptoError::OutputLengthExceeded {
            requested: output_length,
            max,
        })?;
        Ok(okm)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::exchange::{Curve, perform_key_exchange};

    const INFO: &[u8] = b"handshake data";

    fn secret(bytes: &[u8]) -> SharedSecret {
        SharedSecret::from_bytes(Curve::X25519, bytes)
    }

    #[test]
    fn rfc5869_case_1() {
        let kdf = KeyDerivation::new(HashAlgorithm::Sha256);
        let ikm = [0x0bu8; 22];
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();

        let okm = kdf.expand(&ikm, 42, Some(&salt), &info).unwrap();
        assert_eq!(
            hex::encode(okm.as_slice()),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn rfc5869_case_3_without_salt_or_info() {
        let kdf = KeyDerivation::default();
        let okm = kdf.expand(&[0x0bu8; 22], 42, None, b"").unwrap();
        assert_eq!(
            hex::encode(okm.as_slice()),
            "8da4e775a563c18f715f802a063c5a31b8a11f5c5ee1879ec3454e5f3c738d2d9d201395faa4b61a96c8"
        );
    }

    #[test]
    fn derive_is_deterministic() {
        let kdf = KeyDerivation::default();
        let s = secret(&[0x42; 32]);
        let a = kdf.derive(&s, 32, None, INFO, Round::One).unwrap();
        let b = kdf.derive(&s, 32, None, INFO, Round::One).unwrap();
        assert!(a.ct_eq(&b));
        assert_eq!(a.len(), 32);
        assert_eq!(a.round(), Round::One);
        assert_eq!(a.info(), INFO);
    }

    #[test]
    fn different_info_gives_different_keys() {
        let kdf = KeyDerivation::default();
        let s = secret(&[0x42; 32]);
        let a = kdf
            .derive(&s, 32, None, b"handshake data", Round::One)
            .unwrap();
        let b = kdf
            .derive(&s, 32, None, b"round-2 data", Round::One)
            .unwrap();
        assert!(!a.ct_eq(&b));
    }

    #[test]
    fn same_info_different_secrets_differ() {
        let kdf = KeyDerivation::default();
        let (s1, _) = perform_key_exchange(Curve::X25519).unwrap();
        let (s2, _) = perform_key_exchange(Curve::X25519).unwrap();
        let a = kdf.derive(&s1, 32, None, INFO, Round::One).unwrap();
        let b = kdf.derive(&s2, 32, None, INFO, Round::Two).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn salt_changes_output() {
        let kdf = KeyDerivation::default();
        let s = secret(&[7; 32]);
        let a = kdf.derive(&s, 32, None, INFO, Round::One).unwrap();
        let b = kdf.derive(&s, 32, Some(b"salt"), INFO, Round::One).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn output_length_ceiling_is_enforced() {
        for hash in [
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            let kdf = KeyDerivation::new(hash);
            let max = 255 * hash.output_size();
            assert!(
                kdf.derive(&secret(&[1; 32]), max, None, INFO, Round::One)
                    .is_ok()
            );

            let result = kdf.derive(&secret(&[1; 32]), max + 1, None, INFO, Round::One);
            match result {
                Err(CryptoError::OutputLengthExceeded { requested, max: m }) => {
                    assert_eq!(requested, max + 1);
                    assert_eq!(m, max);
                }
                other => panic!("expected OutputLengthExceeded, got {other:?}"),
            }
        }
    }

    #[test]
    fn hash_choice_changes_output() {
        let s = secret(&[9; 32]);
        let a = KeyDerivation::new(HashAlgorithm::Sha256)
            .derive(&s, 32, None, INFO, Round::One)
            .unwrap();
        let b = KeyDerivation::new(HashAlgorithm::Sha512)
            .derive(&s, 32, None, INFO, Round::One)
            .unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn debug_and_display_redact_key() {
        let key = KeyDerivation::default()
            .derive(&secret(&[3; 32]), 32, None, INFO, Round::Two)
            .unwrap();
        let debug = format!("{key:?}");
        let display = key.to_string();
        let hex_key = hex::encode(key.as_bytes());
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(&hex_key));
        assert!(!display.contains(&hex_key));
        assert!(display.starts_with("round-2 key (32 bytes"));
    }

    proptest! {
        #[test]
        fn info_separates_keys(
            ikm in proptest::collection::vec(any::<u8>(), 1..64),
            info_a in proptest::collection::vec(any::<u8>(), 0..32),
            info_b in proptest::collection::vec(any::<u8>(), 0..32),
        ) {
            prop_assume!(info_a != info_b);
            let kdf = KeyDerivation::default();
            let s = secret(&ikm);
            let a = kdf.derive(&s, 32, None, &info_a, Round::One).unwrap();
            let b = kdf.derive(&s, 32, None, &info_b, Round::One).unwrap();
            let a2 = kdf.derive(&s, 32, None, &info_a, Round::One).unwrap();
            prop_assert_ne!(a.as_bytes(), b.as_bytes());
            prop_assert_eq!(a.as_bytes(), a2.as_bytes());
        }
    }
}
