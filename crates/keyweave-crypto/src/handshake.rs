//! Two-round handshake coordinator.
//!
//! Drives key exchange and key derivation through a fixed sequence of
//! states. Each round uses a fresh ephemeral key pair; the only things that
//! survive from round 1 into round 2 are the round-1 derived key and the
//! transcript of public values.
//!
//! ```text
//! Idle -> Round1Exchanged -> Round1Derived -> Round2Exchanged -> Round2Derived -> Complete
//! ```
//!
//! Any error, including a call made in the wrong state, resets the
//! coordinator to [`HandshakeState::Idle`] and drops everything it held.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::config::HandshakeConfig;
use crate::error::{CryptoError, Result};
use crate::exchange::{Curve, KeyExchangeEngine, KeyPair, PublicKey, SharedSecret};
use crate::kdf::{DerivedKey, KeyDerivation, Round};

const TRANSCRIPT_LABEL: &[u8] = b"keyweave-handshake-v1";

/// Size of the transcript hash returned by [`HandshakeCoordinator::finish`].
pub const TRANSCRIPT_SIZE: usize = 32;

/// Position in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    Idle,
    Round1Exchanged,
    Round1Derived,
    Round2Exchanged,
    Round2Derived,
    Complete,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Round1Exchanged => "round-1 exchanged",
            Self::Round1Derived => "round-1 derived",
            Self::Round2Exchanged => "round-2 exchanged",
            Self::Round2Derived => "round-2 derived",
            Self::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Which side of the handshake this coordinator plays.
///
/// Only affects the order in which public keys enter the transcript, so both
/// sides hash the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Responder,
}

/// Output of a completed handshake.
pub struct HandshakeKeys {
    derived_key_1: DerivedKey,
    derived_key_2: DerivedKey,
    transcript: [u8; TRANSCRIPT_SIZE],
}

impl HandshakeKeys {
    pub const fn derived_key_1(&self) -> &DerivedKey {
        &self.derived_key_1
    }

    pub const fn derived_key_2(&self) -> &DerivedKey {
        &self.derived_key_2
    }

    /// SHA-256 over both rounds' public keys. Not secret.
    pub fn transcript(&self) -> &[u8] {
        &self.transcript
    }

    pub fn into_keys(self) -> (DerivedKey, DerivedKey) {
        (self.derived_key_1, self.derived_key_2)
    }
}

impl fmt::Debug for HandshakeKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeKeys")
            .field("derived_key_1", &self.derived_key_1)
            .field("derived_key_2", &self.derived_key_2)
            .field("transcript", &hex::encode(self.transcript))
            .finish()
    }
}

/// State machine for one two-round handshake.
///
/// Every transition takes `&mut self`; wrap the coordinator in a `Mutex` to
/// drive it from several threads.
pub struct HandshakeCoordinator {
    config: HandshakeConfig,
    role: Role,
    engine: KeyExchangeEngine,
    kdf: KeyDerivation,
    state: HandshakeState,
    ephemeral: Option<KeyPair>,
    shared: Option<SharedSecret>,
    derived_key_1: Option<DerivedKey>,
    derived_key_2: Option<DerivedKey>,
    transcript: Sha256,
}

impl fmt::Debug for HandshakeCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeCoordinator")
            .field("role", &self.role)
            .field("curve", &self.config.curve)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl HandshakeCoordinator {
    /// Create an idle coordinator after validating `config`.
    pub fn new(config: HandshakeConfig, role: Role) -> Result<Self> {
        config.validate()?;
        let curve = config.curve;
        Ok(Self {
            engine: KeyExchangeEngine::new(curve),
            kdf: KeyDerivation::new(config.hash),
            config,
            role,
            state: HandshakeState::Idle,
            ephemeral: None,
            shared: None,
            derived_key_1: None,
            derived_key_2: None,
            transcript: new_transcript(curve),
        })
    }

    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    pub const fn role(&self) -> Role {
        self.role
    }

    pub const fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// This round's ephemeral public key, generated on first call.
    ///
    /// Valid in `Idle` (round 1) and `Round1Derived` (round 2). Repeated
    /// calls within a round return the same key.
    pub fn local_public(&mut self) -> Result<PublicKey> {
        match self.state {
            HandshakeState::Idle | HandshakeState::Round1Derived => {}
            actual => {
                return Err(self.fail(CryptoError::UnexpectedState {
                    expected: "Idle or Round1Derived",
                    actual,
                }));
            }
        }

        if let Some(pair) = &self.ephemeral {
            return Ok(pair.public_key().clone());
        }
        match self.engine.generate_keypair() {
            Ok(pair) => {
                let public = pair.public_key().clone();
                tracing::debug!(
                    round = %self.current_round(),
                    fingerprint = %public.fingerprint(),
                    "generated ephemeral key"
                );
                self.ephemeral = Some(pair);
                Ok(public)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Run Diffie-Hellman against the peer's public key for this round.
    ///
    /// `Idle -> Round1Exchanged` or `Round1Derived -> Round2Exchanged`.
    /// Calling it again before `derive` hits the consumed ephemeral key and
    /// fails with [`CryptoError::KeyReuseViolation`].
    pub fn exchange(&mut self, peer: &PublicKey) -> Result<()> {
        let next = match self.state {
            HandshakeState::Idle => HandshakeState::Round1Exchanged,
            HandshakeState::Round1Derived => HandshakeState::Round2Exchanged,
            HandshakeState::Round1Exchanged | HandshakeState::Round2Exchanged => self.state,
            actual => {
                return Err(self.fail(CryptoError::UnexpectedState {
                    expected: "Idle or Round1Derived",
                    actual,
                }));
            }
        };

        let Some(own) = self.ephemeral.as_mut() else {
            return Err(self.fail(CryptoError::UnexpectedState {
                expected: "local_public before exchange",
                actual: self.state,
            }));
        };

        let local = own.public_key().clone();
        let shared = match self.engine.exchange(own, peer) {
            Ok(shared) => shared,
            Err(e) => return Err(self.fail(e)),
        };

        let round = self.current_round();
        let (initiator, responder) = match self.role {
            Role::Initiator => (&local, peer),
            Role::Responder => (peer, &local),
        };
        self.transcript.update([round.number()]);
        self.transcript.update(initiator.as_bytes());
        self.transcript.update(responder.as_bytes());

        self.shared = Some(shared);
        self.transition(next);
        Ok(())
    }

    /// Derive this round's key and discard the shared secret.
    ///
    /// `Round1Exchanged -> Round1Derived` or `Round2Exchanged -> Round2Derived`.
    pub fn derive(&mut self) -> Result<()> {
        let (round, next) = match self.state {
            HandshakeState::Round1Exchanged => (Round::One, HandshakeState::Round1Derived),
            HandshakeState::Round2Exchanged => (Round::Two, HandshakeState::Round2Derived),
            actual => {
                return Err(self.fail(CryptoError::UnexpectedState {
                    expected: "Round1Exchanged or Round2Exchanged",
                    actual,
                }));
            }
        };

        let Some(shared) = self.shared.take() else {
            return Err(self.fail(CryptoError::UnexpectedState {
                expected: "shared secret present",
                actual: self.state,
            }));
        };
        self.ephemeral = None;

        let info = match round {
            Round::One => self.config.round1_info.as_bytes(),
            Round::Two => self.config.round2_info.as_bytes(),
        };
        let derived = self.kdf.derive(
            &shared,
            self.config.key_length,
            self.config.salt_bytes(),
            info,
            round,
        );
        drop(shared);

        match derived {
            Ok(key) => {
                match round {
                    Round::One => self.derived_key_1 = Some(key),
                    Round::Two => self.derived_key_2 = Some(key),
                }
                self.transition(next);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Hand out both round keys and the transcript hash.
    ///
    /// `Round2Derived -> Complete`. The coordinator keeps nothing afterwards.
    pub fn finish(&mut self) -> Result<HandshakeKeys> {
        if self.state != HandshakeState::Round2Derived {
            let actual = self.state;
            return Err(self.fail(CryptoError::UnexpectedState {
                expected: "Round2Derived",
                actual,
            }));
        }
        let (Some(derived_key_1), Some(derived_key_2)) =
            (self.derived_key_1.take(), self.derived_key_2.take())
        else {
            return Err(self.fail(CryptoError::UnexpectedState {
                expected: "both round keys present",
                actual: self.state,
            }));
        };

        let hasher = std::mem::replace(&mut self.transcript, new_transcript(self.config.curve));
        let transcript: [u8; TRANSCRIPT_SIZE] = hasher.finalize().into();

        self.transition(HandshakeState::Complete);
        Ok(HandshakeKeys {
            derived_key_1,
            derived_key_2,
            transcript,
        })
    }

    /// Drop all held material and return to `Idle`.
    pub fn reset(&mut self) {
        self.ephemeral = None;
        self.shared = None;
        self.derived_key_1 = None;
        self.derived_key_2 = None;
        self.transcript = new_transcript(self.config.curve);
        self.state = HandshakeState::Idle;
    }

    const fn current_round(&self) -> Round {
        match self.state {
            HandshakeState::Idle | HandshakeState::Round1Exchanged => Round::One,
            _ => Round::Two,
        }
    }

    fn transition(&mut self, next: HandshakeState) {
        tracing::debug!(role = ?self.role, from = %self.state, to = %next, "handshake transition");
        self.state = next;
    }

    fn fail(&mut self, error: CryptoError) -> CryptoError {
        tracing::debug!(
            role = ?self.role,
            state = %self.state,
            %error,
            "handshake reset after error"
        );
        self.reset();
        error
    }
}

fn new_transcript(curve: Curve) -> Sha256 {
    let mut hasher = Sha256::new();
    hasher.update(TRANSCRIPT_LABEL);
    hasher.update([curve.id()]);
    hasher
}

/// Run a complete handshake between two in-process coordinators.
///
/// Returns (`initiator_keys`, `responder_keys`).
#[cfg(any(test, feature = "test-utils"))]
pub fn perform_handshake(config: &HandshakeConfig) -> Result<(HandshakeKeys, HandshakeKeys)> {
    let mut initiator = HandshakeCoordinator::new(config.clone(), Role::Initiator)?;
    let mut responder = HandshakeCoordinator::new(config.clone(), Role::Responder)?;

    for _ in 0..2 {
        let a = initiator.local_public()?;
        let b = responder.local_public()?;
        initiator.exchange(&b)?;
        responder.exchange(&a)?;
        initiator.derive()?;
        responder.derive()?;
    }

    Ok((initiator.finish()?, responder.finish()?))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;

    use super::*;
    use crate::provider::HashAlgorithm;

    fn pair(config: &HandshakeConfig) -> (HandshakeCoordinator, HandshakeCoordinator) {
        (
            HandshakeCoordinator::new(config.clone(), Role::Initiator).unwrap(),
            HandshakeCoordinator::new(config.clone(), Role::Responder).unwrap(),
        )
    }

    #[test]
    fn two_round_x25519_scenario() {
        let (a, b) = perform_handshake(&HandshakeConfig::default()).unwrap();

        assert_eq!(a.derived_key_1().len(), 32);
        assert!(a.derived_key_1().ct_eq(b.derived_key_1()));
        assert!(a.derived_key_2().ct_eq(b.derived_key_2()));
        assert!(!a.derived_key_1().ct_eq(a.derived_key_2()));
        assert_eq!(a.transcript(), b.transcript());
        assert_eq!(a.derived_key_1().round(), Round::One);
        assert_eq!(a.derived_key_2().round(), Round::Two);
    }

    #[test]
    fn x448_with_custom_parameters() {
        let config = HandshakeConfig {
            curve: Curve::X448,
            hash: HashAlgorithm::Sha512,
            key_length: 64,
            salt: Some("keyweave-test".to_string()),
            round1_info: "first".to_string(),
            round2_info: "second".to_string(),
        };
        let (a, b) = perform_handshake(&config).unwrap();
        assert_eq!(a.derived_key_2().len(), 64);
        assert!(a.derived_key_2().ct_eq(b.derived_key_2()));
        assert_eq!(a.derived_key_1().info(), b"first");
        assert_eq!(a.derived_key_2().info(), b"second");
    }

    #[test]
    fn states_advance_in_order() {
        let (mut a, mut b) = pair(&HandshakeConfig::default());
        assert_eq!(a.state(), HandshakeState::Idle);

        let pa = a.local_public().unwrap();
        let pb = b.local_public().unwrap();
        assert_eq!(a.local_public().unwrap(), pa);

        a.exchange(&pb).unwrap();
        assert_eq!(a.state(), HandshakeState::Round1Exchanged);
        a.derive().unwrap();
        assert_eq!(a.state(), HandshakeState::Round1Derived);

        let pa2 = a.local_public().unwrap();
        assert_ne!(pa, pa2);

        b.exchange(&pa).unwrap();
        b.derive().unwrap();
        let pb2 = b.local_public().unwrap();

        a.exchange(&pb2).unwrap();
        assert_eq!(a.state(), HandshakeState::Round2Exchanged);
        a.derive().unwrap();
        assert_eq!(a.state(), HandshakeState::Round2Derived);
        a.finish().unwrap();
        assert_eq!(a.state(), HandshakeState::Complete);
    }

    #[test]
    fn second_exchange_in_round_is_key_reuse() {
        let (mut a, mut b) = pair(&HandshakeConfig::default());
        a.local_public().unwrap();
        let pb = b.local_public().unwrap();

        a.exchange(&pb).unwrap();
        let err = a.exchange(&pb).unwrap_err();
        assert!(matches!(err, CryptoError::KeyReuseViolation));
        assert_eq!(a.state(), HandshakeState::Idle);
    }

    #[test]
    fn out_of_order_calls_reset_to_idle() {
        let (mut a, _) = pair(&HandshakeConfig::default());

        let err = a.derive().unwrap_err();
        assert!(matches!(
            err,
            CryptoError::UnexpectedState {
                actual: HandshakeState::Idle,
                ..
            }
        ));

        let err = a.finish().unwrap_err();
        assert!(matches!(err, CryptoError::UnexpectedState { .. }));
        assert_eq!(a.state(), HandshakeState::Idle);
    }

    #[test]
    fn exchange_without_local_key_is_rejected() {
        let (mut a, mut b) = pair(&HandshakeConfig::default());
        let pb = b.local_public().unwrap();
        assert!(matches!(
            a.exchange(&pb),
            Err(CryptoError::UnexpectedState { .. })
        ));
    }

    #[test]
    fn failure_midway_discards_round_one_key() {
        let (mut a, mut b) = pair(&HandshakeConfig::default());
        a.local_public().unwrap();
        let pb = b.local_public().unwrap();
        a.exchange(&pb).unwrap();
        a.derive().unwrap();
        a.local_public().unwrap();

        let wrong = KeyExchangeEngine::new(Curve::X448)
            .generate_keypair()
            .unwrap()
            .public_key()
            .clone();
        let err = a.exchange(&wrong).unwrap_err();
        assert!(matches!(err, CryptoError::CurveMismatch { .. }));
        assert_eq!(a.state(), HandshakeState::Idle);
        assert!(a.derived_key_1.is_none());
        assert!(a.ephemeral.is_none());
    }

    #[test]
    fn low_order_peer_point_resets() {
        let (mut a, _) = pair(&HandshakeConfig::default());
        a.local_public().unwrap();
        let zero = PublicKey::from_bytes(Curve::X25519, &[0u8; 32]).unwrap();
        assert!(matches!(
            a.exchange(&zero),
            Err(CryptoError::InvalidPeerKey)
        ));
        assert_eq!(a.state(), HandshakeState::Idle);
    }

    #[test]
    fn coordinator_is_reusable_after_reset() {
        let (mut a, mut b) = pair(&HandshakeConfig::default());
        a.finish().unwrap_err();

        for _ in 0..2 {
            let pa = a.local_public().unwrap();
            let pb = b.local_public().unwrap();
            a.exchange(&pb).unwrap();
            b.exchange(&pa).unwrap();
            a.derive().unwrap();
            b.derive().unwrap();
        }
        let ka = a.finish().unwrap();
        let kb = b.finish().unwrap();
        assert!(ka.derived_key_2().ct_eq(kb.derived_key_2()));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = HandshakeConfig {
            key_length: 0,
            ..HandshakeConfig::default()
        };
        assert!(matches!(
            HandshakeCoordinator::new(config, Role::Initiator),
            Err(CryptoError::InvalidConfig(_))
        ));
    }

    #[test]
    fn transcripts_differ_between_sessions() {
        let config = HandshakeConfig::default();
        let (a, _) = perform_handshake(&config).unwrap();
        let (c, _) = perform_handshake(&config).unwrap();
        assert_ne!(a.transcript(), c.transcript());
    }

    #[test]
    fn debug_output_is_redacted() {
        let (a, _) = perform_handshake(&HandshakeConfig::default()).unwrap();
        let debug = format!("{a:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(&hex::encode(a.derived_key_1().as_bytes())));
    }

    #[test]
    fn coordinator_can_be_shared_behind_mutex() {
        let config = HandshakeConfig::default();
        let a = Arc::new(Mutex::new(
            HandshakeCoordinator::new(config.clone(), Role::Initiator).unwrap(),
        ));
        let mut b = HandshakeCoordinator::new(config, Role::Responder).unwrap();

        for _ in 0..2 {
            let shared = Arc::clone(&a);
            let pa = thread::spawn(move || shared.lock().unwrap().local_public().unwrap())
                .join()
                .unwrap();
            let pb = b.local_public().unwrap();
            b.exchange(&pa).unwrap();
            b.derive().unwrap();

            let shared = Arc::clone(&a);
            thread::spawn(move || {
                let mut guard = shared.lock().unwrap();
                guard.exchange(&pb).unwrap();
                guard.derive().unwrap();
            })
            .join()
            .unwrap();
        }

        let ka = a.lock().unwrap().finish().unwrap();
        let kb = b.finish().unwrap();
        assert!(ka.derived_key_1().ct_eq(kb.derived_key_1()));
        assert!(ka.derived_key_2().ct_eq(kb.derived_key_2()));
    }

    #[test]
    fn independent_handshakes_on_separate_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| thread::spawn(|| perform_handshake(&HandshakeConfig::default()).unwrap()))
            .collect();
        for handle in handles {
            let (a, b) = handle.join().unwrap();
            assert!(a.derived_key_2().ct_eq(b.derived_key_2()));
        }
    }
}
