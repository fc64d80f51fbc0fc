//! Noise engine adapter.
//!
//! Uses Noise XX pattern: `Noise_XX_25519_ChaChaPoly_SHA256`
//!
//! # Handshake Flow
//!
//! ```text
//! Initiator                              Responder
//!     |                                       |
//!     |  -> e                                 |  ephemeral key
//!     |-------------------------------------->|
//!     |                                       |
//!     |  <- e, ee, s, es   + payload          |  ephemeral, static
//!     |<--------------------------------------|
//!     |                                       |
//!     |  -> s, se          + payload          |  static key
//!     |-------------------------------------->|
//!     |                                       |
//!     [   Cipher states split from transcript  ]
//! ```
//!
//! The Noise static key is generated fresh for every session and is never
//! the long-term identity. The identity is bound to it by the signed
//! payloads carried in messages 2 and 3.

use snow::params::NoiseParams;
use snow::{Builder, HandshakeState};
use std::fmt;
use std::mem;
use zeroize::{Zeroize, Zeroizing};

use crate::cipher::CipherState;
use crate::handshake::Role;

/// Noise protocol pattern (XX with X25519, ChaCha20-Poly1305, SHA-256).
///
/// The only suite spoken; there is no negotiation.
pub const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

/// Maximum size of one Noise message.
pub const MAX_NOISE_MESSAGE_LEN: usize = 65535;

/// Cipher states yielded when the pattern completes, in split order:
/// initiator-to-responder first.
pub type CipherPair = (CipherState, CipherState);

fn noise_params() -> Result<NoiseParams, snow::Error> {
    NOISE_PATTERN.parse()
}

/// X25519 keypair used as the Noise static key of a single session.
pub struct NoiseKeypair {
    private: Zeroizing<Vec<u8>>,
    public: [u8; 32],
}

impl NoiseKeypair {
    pub fn public(&self) -> &[u8; 32] {
        &self.public
    }
}

impl fmt::Debug for NoiseKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseKeypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Generate a random X25519 keypair for Noise from the OS CSPRNG.
pub fn generate_keypair() -> Result<NoiseKeypair, snow::Error> {
    let mut keypair = Builder::new(noise_params()?).generate_keypair()?;

    let public: [u8; 32] = keypair
        .public
        .as_slice()
        .try_into()
        .map_err(|_| snow::Error::Input)?;

    Ok(NoiseKeypair {
        private: Zeroizing::new(mem::take(&mut keypair.private)),
        public,
    })
}

/// Single-use Noise XX handshake state.
///
/// Each message step returns the cipher pair exactly when that step
/// completes the pattern, whichever physical message that is for the role.
pub struct NoiseHandshake {
    state: Box<HandshakeState>,
}

impl NoiseHandshake {
    /// Build the handshake state for `role` around a session keypair.
    pub fn new(role: Role, keypair: &NoiseKeypair) -> Result<Self, snow::Error> {
        let builder = Builder::new(noise_params()?).local_private_key(&keypair.private[..]);

        let state = match role {
            Role::Initiator => builder.build_initiator()?,
            Role::Responder => builder.build_responder()?,
        };

        Ok(Self {
            state: Box::new(state),
        })
    }

    /// Produce the next handshake message carrying `payload`.
    pub fn write_message(
        &mut self,
        payload: &[u8],
    ) -> Result<(Vec<u8>, Option<CipherPair>), snow::Error> {
        let mut buf = vec![0u8; MAX_NOISE_MESSAGE_LEN];
        let len = self.state.write_message(payload, &mut buf)?;
        buf.truncate(len);
        Ok((buf, self.split_if_finished()))
    }

    /// Process the next handshake message and return its payload.
    pub fn read_message(
        &mut self,
        message: &[u8],
    ) -> Result<(Vec<u8>, Option<CipherPair>), snow::Error> {
        let mut buf = vec![0u8; MAX_NOISE_MESSAGE_LEN];
        let len = self.state.read_message(message, &mut buf)?;
        buf.truncate(len);
        Ok((buf, self.split_if_finished()))
    }

    /// The remote Noise static key, once the pattern has revealed it.
    pub fn remote_static(&self) -> Option<[u8; 32]> {
        self.state
            .get_remote_static()
            .and_then(|s| s.try_into().ok())
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_handshake_finished()
    }

    fn split_if_finished(&mut self) -> Option<CipherPair> {
        if !self.state.is_handshake_finished() {
            return None;
        }

        let (mut initiator_key, mut responder_key) = self.state.dangerously_get_raw_split();
        let pair = (
            CipherState::new(&initiator_key),
            CipherState::new(&responder_key),
        );
        initiator_key.zeroize();
        responder_key.zeroize();
        Some(pair)
    }
}
