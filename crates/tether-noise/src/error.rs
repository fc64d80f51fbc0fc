//! Handshake error taxonomy.

use std::io;
use thiserror::Error;

use crate::identity::{KeyError, PeerId};

/// Errors that abort a handshake.
///
/// Every variant is terminal for the session that produced it. A retry
/// needs a fresh [`Session`](crate::handshake::Session) over a fresh
/// connection.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Generating the per-session Noise key or building the engine failed.
    #[error("failed to initialize handshake keys: {0}")]
    KeyGeneration(#[source] snow::Error),

    /// Sending or receiving a handshake frame failed, including timeouts
    /// and the peer closing the connection.
    #[error("handshake transport failure: {0}")]
    Transport(#[from] io::Error),

    /// The Noise engine rejected a message (malformed or failed AEAD).
    #[error("handshake message rejected: {0}")]
    Protocol(#[source] snow::Error),

    /// The identity binding payload could not be decoded.
    #[error("malformed handshake payload: {0}")]
    PayloadDecode(String),

    /// The remote identity key uses an unknown or malformed encoding.
    #[error("unsupported identity key: {0}")]
    UnsupportedKey(#[from] KeyError),

    /// The remote identity does not match the peer we dialed.
    #[error("peer id mismatch: expected {expected}, but remote key matches {actual}")]
    IdentityMismatch { expected: PeerId, actual: PeerId },

    /// The remote identity key did not sign this session's Noise key.
    #[error("handshake signature invalid")]
    SignatureInvalid,

    /// The session was given settings it cannot run with.
    #[error("invalid handshake config: {0}")]
    InvalidConfig(String),

    /// `run` was called on a session that already finished or aborted.
    #[error("session has already run its handshake")]
    SessionConsumed,

    /// Internal sequencing bug. The session fails closed.
    #[error("handshake invariant violated: {0}")]
    InvariantViolation(&'static str),
}

impl HandshakeError {
    /// Whether this failure points at tampering or impersonation rather
    /// than a benign network problem.
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::IdentityMismatch { .. } | Self::SignatureInvalid
        )
    }
}
