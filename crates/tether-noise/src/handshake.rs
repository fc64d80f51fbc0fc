//! Handshake orchestration.
//!
//! A [`Session`] upgrades one insecure [`FramedConn`] into an authenticated
//! channel by running the XX exchange in a fixed, role-specific order:
//!
//! ```text
//!            Initiator                     Responder
//! msg 1      send (no payload)             receive (nothing to check)
//! msg 2      receive + verify identity     send identity
//! msg 3      send identity                 receive + verify identity
//! ```
//!
//! The initiator authenticates the responder before revealing its own
//! identity. The responder reveals its identity first, to a peer that has
//! proven nothing yet, but already encrypted under the ephemeral DH.
//!
//! A session ends either secured, with both cipher states and a verified
//! remote identity, or aborted. Nothing in between is observable.

use std::fmt;
use std::io;
use std::mem;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time;
use tracing::{debug, info, warn};

use crate::cipher::{CipherError, CipherStates, CipherState};
use crate::config::HandshakeConfig;
use crate::error::HandshakeError;
use crate::identity::{IdentityKeypair, PeerId, PublicKey};
use crate::noise::{self, NoiseHandshake, NoiseKeypair};
use crate::payload;
use crate::transport::FramedConn;

/// Which side of the exchange a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Dials the connection and sends the first message.
    Initiator,
    /// Accepts the connection.
    Responder,
}

impl Role {
    fn script(self) -> &'static [Step; 3] {
        match self {
            Role::Initiator => &INITIATOR_SCRIPT,
            Role::Responder => &RESPONDER_SCRIPT,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Write a message with an empty payload.
    SendEmpty,
    /// Write a message carrying our identity binding payload.
    SendIdentity,
    /// Read a message whose payload is not used.
    ReceiveEmpty,
    /// Read a message and verify the remote identity binding payload.
    ReceiveIdentity,
}

// do not send the identity in message 1, as it would be plaintext
const INITIATOR_SCRIPT: [Step; 3] = [Step::SendEmpty, Step::ReceiveIdentity, Step::SendIdentity];
const RESPONDER_SCRIPT: [Step; 3] = [Step::ReceiveEmpty, Step::SendIdentity, Step::ReceiveIdentity];

/// Resources consumed by the exchange and dropped with it.
struct Pending {
    noise_keypair: NoiseKeypair,
    engine: NoiseHandshake,
}

/// Outcome of a successful handshake.
#[derive(Debug)]
pub struct SecuredSession {
    remote_peer_id: PeerId,
    remote_public_key: PublicKey,
    encrypt: CipherState,
    decrypt: CipherState,
}

impl SecuredSession {
    pub fn remote_peer_id(&self) -> &PeerId {
        &self.remote_peer_id
    }

    pub fn remote_public_key(&self) -> &PublicKey {
        &self.remote_public_key
    }

    /// Cipher state protecting traffic we send.
    pub fn encrypt_state(&mut self) -> &mut CipherState {
        &mut self.encrypt
    }

    /// Cipher state for traffic the remote sends.
    pub fn decrypt_state(&mut self) -> &mut CipherState {
        &mut self.decrypt
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.encrypt.encrypt(plaintext)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.decrypt.decrypt(ciphertext)
    }

    /// Split into `(encrypt, decrypt)` for independent send and receive halves.
    pub fn into_parts(self) -> (CipherState, CipherState) {
        (self.encrypt, self.decrypt)
    }
}

enum SessionState {
    Pending(Box<Pending>),
    Secured(SecuredSession),
    Aborted,
}

/// One handshake attempt over one connection.
///
/// Created with a fresh Noise keypair; `run` may be called once. After a
/// failure the connection must be closed and a new session built for any
/// retry.
pub struct Session<'a> {
    role: Role,
    identity: &'a IdentityKeypair,
    expected_peer: Option<PeerId>,
    script: &'static [Step; 3],
    config: HandshakeConfig,
    state: SessionState,
}

impl<'a> Session<'a> {
    /// Create a session, generating its Noise keypair and engine state.
    ///
    /// `expected_peer`, when set, pins the remote identity.
    pub fn new(
        role: Role,
        identity: &'a IdentityKeypair,
        expected_peer: Option<PeerId>,
    ) -> Result<Self, HandshakeError> {
        let noise_keypair = noise::generate_keypair().map_err(HandshakeError::KeyGeneration)?;
        let engine =
            NoiseHandshake::new(role, &noise_keypair).map_err(HandshakeError::KeyGeneration)?;

        Ok(Self {
            role,
            identity,
            expected_peer,
            script: role.script(),
            config: HandshakeConfig::default(),
            state: SessionState::Pending(Box::new(Pending {
                noise_keypair,
                engine,
            })),
        })
    }

    /// Session for dialing; pass the peer id when the remote is known.
    pub fn initiator(
        identity: &'a IdentityKeypair,
        expected_peer: Option<PeerId>,
    ) -> Result<Self, HandshakeError> {
        Self::new(Role::Initiator, identity, expected_peer)
    }

    /// Session for an accepted connection.
    pub fn responder(identity: &'a IdentityKeypair) -> Result<Self, HandshakeError> {
        Self::new(Role::Responder, identity, None)
    }

    /// Replace the default settings; rejects configs that fail
    /// [`HandshakeConfig::validate`].
    pub fn with_config(mut self, config: HandshakeConfig) -> Result<Self, HandshakeError> {
        config
            .validate()
            .map_err(|e| HandshakeError::InvalidConfig(format!("{:#}", e)))?;
        self.config = config;
        Ok(self)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    /// This session's Noise static public key, until the handshake runs.
    pub fn local_noise_public(&self) -> Option<[u8; 32]> {
        match &self.state {
            SessionState::Pending(pending) => Some(*pending.noise_keypair.public()),
            _ => None,
        }
    }

    pub fn is_secured(&self) -> bool {
        matches!(self.state, SessionState::Secured(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.state, SessionState::Aborted)
    }

    pub fn remote_peer_id(&self) -> Option<&PeerId> {
        self.secured().map(SecuredSession::remote_peer_id)
    }

    pub fn remote_public_key(&self) -> Option<&PublicKey> {
        self.secured().map(SecuredSession::remote_public_key)
    }

    pub fn secured(&self) -> Option<&SecuredSession> {
        match &self.state {
            SessionState::Secured(secured) => Some(secured),
            _ => None,
        }
    }

    pub fn secured_mut(&mut self) -> Option<&mut SecuredSession> {
        match &mut self.state {
            SessionState::Secured(secured) => Some(secured),
            _ => None,
        }
    }

    pub fn into_secured(self) -> Option<SecuredSession> {
        match self.state {
            SessionState::Secured(secured) => Some(secured),
            _ => None,
        }
    }

    /// Run the 3-message exchange over `conn`.
    ///
    /// The session is marked aborted before any I/O starts, so a timeout,
    /// an error, or the caller dropping this future all leave it aborted.
    /// It becomes secured only when every step has succeeded.
    pub async fn run<S>(&mut self, conn: &mut FramedConn<S>) -> Result<(), HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let pending = match mem::replace(&mut self.state, SessionState::Aborted) {
            SessionState::Pending(pending) => pending,
            other => {
                self.state = other;
                return Err(HandshakeError::SessionConsumed);
            }
        };

        let timeout = self.config.handshake_timeout();
        let result = match time::timeout(timeout, self.exchange(*pending, conn)).await {
            Ok(result) => result,
            Err(_) => Err(HandshakeError::Transport(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("handshake did not complete within {:?}", timeout),
            ))),
        };

        match result {
            Ok(secured) => {
                info!(
                    role = %self.role,
                    peer = %secured.remote_peer_id,
                    "noise handshake complete"
                );
                self.state = SessionState::Secured(secured);
                Ok(())
            }
            Err(e) => {
                warn!(role = %self.role, error = %e, "noise handshake aborted");
                Err(e)
            }
        }
    }

    async fn exchange<S>(
        &self,
        pending: Pending,
        conn: &mut FramedConn<S>,
    ) -> Result<SecuredSession, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Pending {
            noise_keypair,
            mut engine,
        } = pending;

        let local_payload = payload::make_payload(self.identity, noise_keypair.public());
        let mut ciphers = CipherStates::default();
        let mut remote = None;

        for (index, step) in self.script.iter().enumerate() {
            let message = index + 1;
            match step {
                Step::SendEmpty => {
                    self.send(&mut engine, conn, &[], &mut ciphers, message).await?;
                }
                Step::SendIdentity => {
                    self.send(&mut engine, conn, &local_payload, &mut ciphers, message)
                        .await?;
                }
                Step::ReceiveEmpty => {
                    self.receive(&mut engine, conn, &mut ciphers, message).await?;
                }
                Step::ReceiveIdentity => {
                    let remote_payload =
                        self.receive(&mut engine, conn, &mut ciphers, message).await?;
                    let remote_static = engine.remote_static().ok_or(
                        HandshakeError::InvariantViolation("remote static key not yet known"),
                    )?;
                    remote = Some(payload::verify_payload(
                        &remote_payload,
                        &remote_static,
                        self.expected_peer.as_ref(),
                        self.config.max_payload_len,
                    )?);
                }
            }
        }

        let (encrypt, decrypt) = ciphers.into_pair().ok_or(
            HandshakeError::InvariantViolation("handshake ended without cipher states"),
        )?;
        let (remote_peer_id, remote_public_key) = remote.ok_or(
            HandshakeError::InvariantViolation("handshake ended without a verified remote"),
        )?;

        Ok(SecuredSession {
            remote_peer_id,
            remote_public_key,
            encrypt,
            decrypt,
        })
    }

    /// Write the next message; keep the cipher states if it was the last.
    async fn send<S>(
        &self,
        engine: &mut NoiseHandshake,
        conn: &mut FramedConn<S>,
        payload: &[u8],
        ciphers: &mut CipherStates,
        message: usize,
    ) -> Result<(), HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (wire, split) = engine
            .write_message(payload)
            .map_err(HandshakeError::Protocol)?;
        conn.write_frame(&wire).await?;
        debug!(role = %self.role, message, len = wire.len(), "sent handshake message");

        if let Some((a, b)) = split {
            ciphers.assign(self.role, a, b)?;
        }
        Ok(())
    }

    /// Read the next message and return its decrypted payload.
    async fn receive<S>(
        &self,
        engine: &mut NoiseHandshake,
        conn: &mut FramedConn<S>,
        ciphers: &mut CipherStates,
        message: usize,
    ) -> Result<Vec<u8>, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let wire = conn.read_frame().await?;
        let (payload, split) = engine
            .read_message(&wire)
            .map_err(HandshakeError::Protocol)?;
        debug!(role = %self.role, message, len = wire.len(), "received handshake message");

        if let Some((a, b)) = split {
            ciphers.assign(self.role, a, b)?;
        }
        Ok(payload)
    }
}

impl fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            SessionState::Pending(_) => "pending",
            SessionState::Secured(_) => "secured",
            SessionState::Aborted => "aborted",
        };
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("expected_peer", &self.expected_peer)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
