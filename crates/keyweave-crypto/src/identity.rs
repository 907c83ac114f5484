//! Signing identities.
//!
//! Long-term Ed25519 / Ed448 key pairs that bind a party to handshake
//! transcript data. The scheme is fixed per key pair: a signature produced
//! under one scheme is never checked against a key of the other.

use std::fmt;

use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};
use crate::handshake::HandshakeKeys;
use crate::provider::{ct_eq, random_array};

pub const ED25519_KEY_SIZE: usize = 32;
pub const ED25519_SIGNATURE_SIZE: usize = 64;
pub const ED448_KEY_SIZE: usize = 57;
pub const ED448_SIGNATURE_SIZE: usize = 114;

/// Signature algorithm of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    #[default]
    Ed25519,
    Ed448,
}

impl SignatureScheme {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ed25519 => "Ed25519",
            Self::Ed448 => "Ed448",
        }
    }

    pub const fn key_len(self) -> usize {
        match self {
            Self::Ed25519 => ED25519_KEY_SIZE,
            Self::Ed448 => ED448_KEY_SIZE,
        }
    }

    pub const fn signature_len(self) -> usize {
        match self {
            Self::Ed25519 => ED25519_SIGNATURE_SIZE,
            Self::Ed448 => ED448_SIGNATURE_SIZE,
        }
    }
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A signature tagged with the scheme that produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    scheme: SignatureScheme,
    bytes: Vec<u8>,
}

impl Signature {
    /// Parse a received signature. Wrong-length input can never verify and
    /// is rejected as [`CryptoError::InvalidSignature`].
    pub fn from_bytes(scheme: SignatureScheme, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != scheme.signature_len() {
            return Err(CryptoError::InvalidSignature);
        }
        Ok(Self {
            scheme,
            bytes: bytes.to_vec(),
        })
    }

    pub const fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("scheme", &self.scheme)
            .field("bytes", &hex::encode(&self.bytes))
            .finish()
    }
}

enum SigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    Ed448(Box<ed448_goldilocks_plus::SigningKey>),
}

/// A long-term signing key pair.
pub struct SigningIdentity {
    key: SigningKey,
    public: VerifyingIdentity,
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("scheme", &self.public.scheme)
            .field("public", &hex::encode(&self.public.bytes))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl SigningIdentity {
    /// Generate a new random identity.
    pub fn generate(scheme: SignatureScheme) -> Result<Self> {
        match scheme {
            SignatureScheme::Ed25519 => {
                let seed = Zeroizing::new(random_array::<ED25519_KEY_SIZE>()?);
                Self::from_secret_bytes(scheme, seed.as_ref())
            }
            SignatureScheme::Ed448 => {
                let seed = Zeroizing::new(random_array::<ED448_KEY_SIZE>()?);
                Self::from_secret_bytes(scheme, seed.as_ref())
            }
        }
    }

    /// Reconstruct from raw secret key bytes.
    pub fn from_secret_bytes(scheme: SignatureScheme, bytes: &[u8]) -> Result<Self> {
        let expected = scheme.key_len();
        if bytes.len() != expected {
            return Err(CryptoError::InvalidKeyLength {
                expected,
                actual: bytes.len(),
            });
        }
        match scheme {
            SignatureScheme::Ed25519 => {
                let mut arr = Zeroizing::new([0u8; ED25519_KEY_SIZE]);
                arr.copy_from_slice(bytes);
                let key = ed25519_dalek::SigningKey::from_bytes(&arr);
                let public = VerifyingIdentity {
                    scheme,
                    bytes: key.verifying_key().to_bytes().to_vec(),
                };
                Ok(Self {
                    key: SigningKey::Ed25519(key),
                    public,
                })
            }
            SignatureScheme::Ed448 => {
                let key = ed448_goldilocks_plus::SigningKey::from(
                    ed448_goldilocks_plus::SecretKey::from_slice(bytes),
                );
                let public = VerifyingIdentity {
                    scheme,
                    bytes: key.verifying_key().to_bytes().to_vec(),
                };
                Ok(Self {
                    key: SigningKey::Ed448(Box::new(key)),
                    public,
                })
            }
        }
    }

    pub const fn scheme(&self) -> SignatureScheme {
        self.public.scheme
    }

    pub const fn verifying_identity(&self) -> &VerifyingIdentity {
        &self.public
    }

    /// Fingerprint of the public half.
    pub fn fingerprint(&self) -> String {
        self.public.fingerprint()
    }

    /// Sign `message`. Both schemes are deterministic.
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        let bytes = match &self.key {
            SigningKey::Ed25519(key) => key.sign(message).to_bytes().to_vec(),
            SigningKey::Ed448(key) => key.sign_raw(message).to_bytes().to_vec(),
        };
        Ok(Signature {
            scheme: self.scheme(),
            bytes,
        })
    }

    /// Sign the transcript hash of a completed handshake.
    pub fn sign_transcript(&self, keys: &HandshakeKeys) -> Result<Signature> {
        self.sign(keys.transcript())
    }
}

/// The public half of a [`SigningIdentity`].
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyingIdentity {
    scheme: SignatureScheme,
    bytes: Vec<u8>,
}

impl VerifyingIdentity {
    /// Parse a peer's public key. Encodings that are not valid points are
    /// rejected as [`CryptoError::InvalidPeerKey`].
    pub fn from_bytes(scheme: SignatureScheme, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != scheme.key_len() {
            return Err(CryptoError::InvalidPeerKey);
        }
        let valid = match scheme {
            SignatureScheme::Ed25519 => {
                let mut arr = [0u8; ED25519_KEY_SIZE];
                arr.copy_from_slice(bytes);
                ed25519_dalek::VerifyingKey::from_bytes(&arr).is_ok()
            }
            SignatureScheme::Ed448 => {
                let mut arr = [0u8; ED448_KEY_SIZE];
                arr.copy_from_slice(bytes);
                ed448_goldilocks_plus::VerifyingKey::from_bytes(&arr).is_ok()
            }
        };
        if !valid {
            return Err(CryptoError::InvalidPeerKey);
        }
        Ok(Self {
            scheme,
            bytes: bytes.to_vec(),
        })
    }

    pub const fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.bytes)
    }

    /// Verify `signature` over `message`.
    ///
    /// A signature from the other scheme is a [`CryptoError::CurveMismatch`];
    /// any other failure is [`CryptoError::InvalidSignature`] with no detail
    /// about where verification failed.
    pub fn verify(&self, signature: &Signature, message: &[u8]) -> Result<()> {
        if signature.scheme != self.scheme {
            return Err(CryptoError::CurveMismatch {
                expected: self.scheme.name(),
                actual: signature.scheme.name(),
            });
        }
        let verified = match self.scheme {
            SignatureScheme::Ed25519 => verify_ed25519(&self.bytes, &signature.bytes, message),
            SignatureScheme::Ed448 => verify_ed448(&self.bytes, &signature.bytes, message),
        };
        if verified {
            Ok(())
        } else {
            tracing::warn!(scheme = %self.scheme, "signature verification failed");
            Err(CryptoError::InvalidSignature)
        }
    }

    /// Verify a peer's signature over a completed handshake's transcript.
    pub fn verify_transcript(&self, signature: &Signature, keys: &HandshakeKeys) -> Result<()> {
        self.verify(signature, keys.transcript())
    }
}

impl fmt::Debug for VerifyingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyingIdentity")
            .field("scheme", &self.scheme)
            .field("public", &hex::encode(&self.bytes))
            .finish()
    }
}

impl fmt::Display for VerifyingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.scheme, self.fingerprint())
    }
}

fn verify_ed25519(public: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let mut arr = [0u8; ED25519_KEY_SIZE];
    arr.copy_from_slice(public);
    let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(&arr) else {
        return false;
    };
    let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &sig).is_ok()
}

fn verify_ed448(public: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let mut arr = [0u8; ED448_KEY_SIZE];
    arr.copy_from_slice(public);
    let Ok(key) = ed448_goldilocks_plus::VerifyingKey::from_bytes(&arr) else {
        return false;
    };
    let Ok(raw) = <&[u8; ED448_SIGNATURE_SIZE]>::try_from(signature) else {
        return false;
    };
    let Ok(sig) = ed448_goldilocks_plus::Signature::from_bytes(raw) else {
        return false;
    };
    key.verify_raw(&sig, message).is_ok()
}

/// Compute a colon-separated hex fingerprint from raw public key bytes.
pub fn fingerprint_of(pubkey_bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(pubkey_bytes);
    hash.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Check a public key against an expected fingerprint in constant time.
pub fn verify_fingerprint(pubkey_bytes: &[u8], expected_fingerprint: &str) -> bool {
    ct_eq(
        fingerprint_of(pubkey_bytes).as_bytes(),
        expected_fingerprint.as_bytes(),
    )
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    const AUTH_MESSAGE: &[u8] = b"my authenticated message";

    fn both_schemes() -> [SignatureScheme; 2] {
        [SignatureScheme::Ed25519, SignatureScheme::Ed448]
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        for scheme in both_schemes() {
            let id = SigningIdentity::generate(scheme).unwrap();
            let sig = id.sign(AUTH_MESSAGE).unwrap();
            assert_eq!(sig.as_bytes().len(), scheme.signature_len());
            id.verifying_identity().verify(&sig, AUTH_MESSAGE).unwrap();
        }
    }

    #[test]
    fn tampered_message_is_rejected() {
        for scheme in both_schemes() {
            let id = SigningIdentity::generate(scheme).unwrap();
            let sig = id.sign(AUTH_MESSAGE).unwrap();
            let result = id
                .verifying_identity()
                .verify(&sig, b"my authenticated messagE");
            assert!(matches!(result, Err(CryptoError::InvalidSignature)));
        }
    }

    #[test]
    fn flipped_signature_bit_is_rejected() {
        for scheme in both_schemes() {
            let id = SigningIdentity::generate(scheme).unwrap();
            let sig = id.sign(AUTH_MESSAGE).unwrap();
            let mut bytes = sig.as_bytes().to_vec();
            bytes[10] ^= 0x01;
            let forged = Signature::from_bytes(scheme, &bytes).unwrap();
            let result = id.verifying_identity().verify(&forged, AUTH_MESSAGE);
            assert!(matches!(result, Err(CryptoError::InvalidSignature)));
        }
    }

    #[test]
    fn other_identity_cannot_verify() {
        for scheme in both_schemes() {
            let alice = SigningIdentity::generate(scheme).unwrap();
            let mallory = SigningIdentity::generate(scheme).unwrap();
            let sig = alice.sign(AUTH_MESSAGE).unwrap();
            let result = mallory.verifying_identity().verify(&sig, AUTH_MESSAGE);
            assert!(matches!(result, Err(CryptoError::InvalidSignature)));
        }
    }

    #[test]
    fn scheme_mismatch_is_reported() {
        let ed25519 = SigningIdentity::generate(SignatureScheme::Ed25519).unwrap();
        let ed448 = SigningIdentity::generate(SignatureScheme::Ed448).unwrap();
        let sig = ed448.sign(AUTH_MESSAGE).unwrap();
        let result = ed25519.verifying_identity().verify(&sig, AUTH_MESSAGE);
        assert!(matches!(
            result,
            Err(CryptoError::CurveMismatch {
                expected: "Ed25519",
                actual: "Ed448"
            })
        ));
    }

    #[test]
    fn signatures_are_deterministic() {
        for scheme in both_schemes() {
            let id = SigningIdentity::generate(scheme).unwrap();
            assert_eq!(id.sign(b"x").unwrap(), id.sign(b"x").unwrap());
        }
    }

    #[test]
    fn ed25519_rfc8032_test_1() {
        let secret =
            hex::decode("9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60")
                .unwrap();
        let id = SigningIdentity::from_secret_bytes(SignatureScheme::Ed25519, &secret).unwrap();
        assert_eq!(
            hex::encode(id.verifying_identity().as_bytes()),
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
        );
        let sig = id.sign(b"").unwrap();
        assert_eq!(
            hex::encode(sig.as_bytes()),
            "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e065\
             224901555fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b"
        );
    }

    #[test]
    fn from_secret_bytes_roundtrips_public_key() {
        for scheme in both_schemes() {
            let secret = vec![7u8; scheme.key_len()];
            let a = SigningIdentity::from_secret_bytes(scheme, &secret).unwrap();
            let b = SigningIdentity::from_secret_bytes(scheme, &secret).unwrap();
            assert_eq!(a.verifying_identity(), b.verifying_identity());

            let parsed =
                VerifyingIdentity::from_bytes(scheme, a.verifying_identity().as_bytes()).unwrap();
            let sig = a.sign(AUTH_MESSAGE).unwrap();
            parsed.verify(&sig, AUTH_MESSAGE).unwrap();
        }
    }

    #[test]
    fn ed448_rfc8032_blank_message() {
        let secret = hex::decode(
            "6c82a562cb808d10d632be89c8513ebf6c929f34ddfa8c9f63c9960ef6e348a3\
             528c8a3fcc2f044e39a3fc5b94492f8f032e7549a20098f95b",
        )
        .unwrap();
        let id = SigningIdentity::from_secret_bytes(SignatureScheme::Ed448, &secret).unwrap();
        assert_eq!(
            hex::encode(id.verifying_identity().as_bytes()),
            "5fd7449b59b461fd2ce787ec616ad46a1da1342485a70e1f8a0ea75d80e96778\
             edf124769b46c7061bd6783df1e50f6cd1fa1abeafe8256180"
        );
        let sig = id.sign(b"").unwrap();
        assert_eq!(
            hex::encode(sig.as_bytes()),
            "533a37f6bbe457251f023c0d88f976ae2dfb504a843e34d2074fd823d41a591f\
             2b233f034f628281f2fd7a22ddd47d7828c59bd0a21bfd3980ff0d2028d4b18a\
             9df63e006c5d1c2d345b925d8dc00b4104852db99ac5c7cdda8530a113a0f4db\
             b61149f05a7363268c71d95808ff2e652600"
        );

        let parsed = VerifyingIdentity::from_bytes(
            SignatureScheme::Ed448,
            id.verifying_identity().as_bytes(),
        )
        .unwrap();
        parsed.verify(&sig, b"").unwrap();
    }

    #[test]
    fn ed448_key_that_is_not_a_point_is_rejected() {
        // y = 2 has no matching x on edwards448.
        let mut bytes = [0u8; ED448_KEY_SIZE];
        bytes[0] = 2;
        let result = VerifyingIdentity::from_bytes(SignatureScheme::Ed448, &bytes);
        assert!(matches!(result, Err(CryptoError::InvalidPeerKey)));
    }

    #[test]
    fn from_secret_bytes_rejects_wrong_length() {
        let err =
            SigningIdentity::from_secret_bytes(SignatureScheme::Ed448, &[0u8; 32]).unwrap_err();
        match err {
            CryptoError::InvalidKeyLength {
                expected: 57,
                actual: 32,
            } => {}
            _ => panic!("wrong error: {err:?}"),
        }
    }

    #[test]
    fn signature_length_is_checked() {
        let result = Signature::from_bytes(SignatureScheme::Ed25519, &[0u8; 63]);
        assert!(matches!(result, Err(CryptoError::InvalidSignature)));
    }

    #[test]
    fn verifying_identity_rejects_wrong_length() {
        let result = VerifyingIdentity::from_bytes(SignatureScheme::Ed25519, &[1u8; 57]);
        assert!(matches!(result, Err(CryptoError::InvalidPeerKey)));
    }

    #[test]
    fn fingerprint_is_human_readable_hex() {
        let id = SigningIdentity::generate(SignatureScheme::Ed25519).unwrap();
        let fp = id.fingerprint();

        // SHA-256 = 32 bytes = 32 hex pairs + 31 colons = 95 chars
        assert_eq!(fp.len(), 95);
        for segment in fp.split(':') {
            assert_eq!(segment.len(), 2);
            assert!(segment.chars().all(|c| c.is_ascii_hexdigit()));
        }
        assert!(verify_fingerprint(id.verifying_identity().as_bytes(), &fp));

        let other = SigningIdentity::generate(SignatureScheme::Ed25519).unwrap();
        assert!(!verify_fingerprint(
            other.verifying_identity().as_bytes(),
            &fp
        ));
    }

    #[test]
    fn debug_impl_redacts_secret() {
        let secret = [0x5au8; ED25519_KEY_SIZE];
        let id = SigningIdentity::from_secret_bytes(SignatureScheme::Ed25519, &secret).unwrap();
        let debug_output = format!("{id:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains(&hex::encode(secret)));
    }
}
