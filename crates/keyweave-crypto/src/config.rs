//! Handshake and transport configuration.
//!
//! These structs enumerate the real choices (curve, hash, key length,
//! context strings, AEAD mode); there are no on/off switches.

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};
use crate::exchange::Curve;
use crate::provider::HashAlgorithm;
use crate::transport::AeadAlgorithm;

/// Default HKDF info for both rounds.
pub const DEFAULT_INFO: &str = "handshake data";

/// Default derived key length in bytes.
pub const DEFAULT_KEY_LENGTH: usize = 32;

/// Parameters for a two-round handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    pub curve: Curve,
    pub hash: HashAlgorithm,
    /// Length of each derived key in bytes.
    pub key_length: usize,
    /// Optional HKDF salt (UTF-8).
    pub salt: Option<String>,
    pub round1_info: String,
    pub round2_info: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            curve: Curve::X25519,
            hash: HashAlgorithm::Sha256,
            key_length: DEFAULT_KEY_LENGTH,
            salt: None,
            round1_info: DEFAULT_INFO.to_string(),
            round2_info: DEFAULT_INFO.to_string(),
        }
    }
}

impl HandshakeConfig {
    pub fn salt_bytes(&self) -> Option<&[u8]> {
        self.salt.as_deref().map(str::as_bytes)
    }

    /// Reject parameters that could only fail later in the handshake.
    pub fn validate(&self) -> Result<()> {
        if self.key_length == 0 {
            return Err(CryptoError::InvalidConfig(
                "key_length must be non-zero".to_string(),
            ));
        }
        let max = 255 * self.hash.output_size();
        if self.key_length > max {
            return Err(CryptoError::InvalidConfig(format!(
                "key_length {} exceeds HKDF-{} maximum of {max}",
                self.key_length, self.hash
            )));
        }
        Ok(())
    }
}

/// Parameters for the AEAD transport keyed by handshake output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TransportConfig {
    pub aead: AeadAlgorithm,
}

impl TransportConfig {
    /// Check that keys of `handshake.key_length` fit the configured AEAD.
    pub fn validate(&self, handshake: &HandshakeConfig) -> Result<()> {
        let expected = self.aead.key_len();
        if handshake.key_length == expected {
            Ok(())
        } else {
            Err(CryptoError::InvalidConfig(format!(
                "{} needs {expected}-byte keys, handshake derives {}",
                self.aead, handshake.key_length
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_sizing() {
        let config = HandshakeConfig::default();
        assert_eq!(config.curve, Curve::X25519);
        assert_eq!(config.hash, HashAlgorithm::Sha256);
        assert_eq!(config.key_length, 32);
        assert_eq!(config.round1_info, "handshake data");
        assert!(config.salt_bytes().is_none());
        config.validate().unwrap();
        TransportConfig::default().validate(&config).unwrap();
    }

    #[test]
    fn zero_and_oversized_key_lengths_are_rejected() {
        let zero = HandshakeConfig {
            key_length: 0,
            ..HandshakeConfig::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(CryptoError::InvalidConfig(_))
        ));

        let huge = HandshakeConfig {
            key_length: 255 * 32 + 1,
            ..HandshakeConfig::default()
        };
        assert!(matches!(
            huge.validate(),
            Err(CryptoError::InvalidConfig(_))
        ));

        let sha512 = HandshakeConfig {
            hash: HashAlgorithm::Sha512,
            ..huge
        };
        sha512.validate().unwrap();
    }

    #[test]
    fn transport_key_length_must_match() {
        let handshake = HandshakeConfig::default();
        let transport = TransportConfig {
            aead: AeadAlgorithm::Aes128Gcm,
        };
        assert!(matches!(
            transport.validate(&handshake),
            Err(CryptoError::InvalidConfig(_))
        ));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{"curve": "x448", "salt": "keyweave"}"#;
        let config: HandshakeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.curve, Curve::X448);
        assert_eq!(config.salt_bytes(), Some(&b"keyweave"[..]));
        assert_eq!(config.key_length, DEFAULT_KEY_LENGTH);

        let transport: TransportConfig =
            serde_json::from_str(r#"{"aead": "chacha20-poly1305"}"#).unwrap();
        assert_eq!(transport.aead, AeadAlgorithm::ChaCha20Poly1305);
    }
}
