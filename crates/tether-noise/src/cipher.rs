//! Directional cipher states and their role-dependent assignment.
//!
//! When the Noise transcript completes the engine hands back two cipher
//! states in a fixed order, `(a, b)`, where `a` protects traffic from the
//! initiator to the responder and `b` the reverse direction:
//!
//! ```text
//!              encrypt    decrypt
//! Initiator       a          b
//! Responder       b          a
//! ```
//!
//! Both peers apply this mapping or the channel is undecodable.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use std::fmt;
use thiserror::Error;
use tracing::error;

use crate::error::HandshakeError;
use crate::handshake::Role;

/// ChaCha20-Poly1305 authentication tag length.
pub const TAG_LEN: usize = 16;

/// Errors from post-handshake encryption.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed")]
    Decryption,

    #[error("nonce space exhausted")]
    NonceExhausted,
}

/// One direction of an established channel.
///
/// Holds the ChaCha20-Poly1305 key from the Noise split and the implicit
/// nonce counter. The counter only advances on success, so a rejected
/// ciphertext does not desynchronize the two peers.
pub struct CipherState {
    cipher: ChaCha20Poly1305,
    nonce: u64,
}

impl CipherState {
    /// Create a cipher state with a zero nonce.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
            nonce: 0,
        }
    }

    /// Nonce that the next operation will use.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Encrypt a message.
    ///
    /// Returns ciphertext (plaintext + 16-byte auth tag).
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = self.next_nonce()?;
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CipherError::Encryption)?;
        self.nonce += 1;
        Ok(ciphertext)
    }

    /// Decrypt a message produced by the peer's matching cipher state.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < TAG_LEN {
            return Err(CipherError::Decryption);
        }

        let nonce = self.next_nonce()?;
        let plaintext = self
            .cipher
            .decrypt(&nonce, ciphertext)
            .map_err(|_| CipherError::Decryption)?;
        self.nonce += 1;
        Ok(plaintext)
    }

    // u64::MAX is reserved by Noise.
    fn next_nonce(&self) -> Result<Nonce, CipherError> {
        if self.nonce == u64::MAX {
            return Err(CipherError::NonceExhausted);
        }
        Ok(counter_to_nonce(self.nonce))
    }
}

impl fmt::Debug for CipherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherState")
            .field("nonce", &self.nonce)
            .finish_non_exhaustive()
    }
}

/// Convert a counter to the 12-byte ChaChaPoly nonce used by Noise:
/// four zero bytes followed by the little-endian counter.
fn counter_to_nonce(counter: u64) -> Nonce {
    let mut nonce_bytes = [0u8; 12];
    nonce_bytes[4..12].copy_from_slice(&counter.to_le_bytes());
    Nonce::from(nonce_bytes)
}

/// Slot for the finalized `(encrypt, decrypt)` pair of one session.
#[derive(Debug, Default)]
pub struct CipherStates {
    assigned: Option<(CipherState, CipherState)>,
}

impl CipherStates {
    /// Orient the engine's `(a, b)` pair for `role` and store it.
    ///
    /// Called once, when the engine reports the transcript complete. A
    /// second call is a sequencing bug and fails closed.
    pub fn assign(
        &mut self,
        role: Role,
        a: CipherState,
        b: CipherState,
    ) -> Result<(), HandshakeError> {
        if self.assigned.is_some() {
            error!(%role, "cipher states offered twice for one session");
            return Err(HandshakeError::InvariantViolation(
                "cipher states assigned more than once",
            ));
        }

        self.assigned = Some(match role {
            Role::Initiator => (a, b),
            Role::Responder => (b, a),
        });
        Ok(())
    }

    /// Take the `(encrypt, decrypt)` pair, if assigned.
    pub fn into_pair(self) -> Option<(CipherState, CipherState)> {
        self.assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: [u8; 32] = [0xa1; 32];
    const KEY_B: [u8; 32] = [0xb2; 32];

    #[test]
    fn test_matching_states_are_inverse() {
        let mut sender = CipherState::new(&KEY_A);
        let mut receiver = CipherState::new(&KEY_A);

        for i in 0..5u8 {
            let plaintext = [i; 40];
            let ciphertext = sender.encrypt(&plaintext).unwrap();
            assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);
            assert_eq!(receiver.decrypt(&ciphertext).unwrap(), plaintext);
        }

        assert_eq!(sender.nonce(), 5);
        assert_eq!(receiver.nonce(), 5);
    }

    #[test]
    fn test_tamper_detection_keeps_counter() {
        let mut sender = CipherState::new(&KEY_A);
        let mut receiver = CipherState::new(&KEY_A);

        let mut ciphertext = sender.encrypt(b"sensitive data").unwrap();
        ciphertext[0] ^= 0xff;

        assert!(matches!(
            receiver.decrypt(&ciphertext),
            Err(CipherError::Decryption)
        ));
        assert_eq!(receiver.nonce(), 0);

        ciphertext[0] ^= 0xff;
        assert_eq!(receiver.decrypt(&ciphertext).unwrap(), b"sensitive data");
    }

    #[test]
    fn test_short_ciphertext_rejected() {
        let mut receiver = CipherState::new(&KEY_A);
        assert!(matches!(
            receiver.decrypt(&[0u8; TAG_LEN - 1]),
            Err(CipherError::Decryption)
        ));
    }

    #[test]
    fn test_out_of_order_fails() {
        let mut sender = CipherState::new(&KEY_A);
        let mut receiver = CipherState::new(&KEY_A);

        let _first = sender.encrypt(b"first").unwrap();
        let second = sender.encrypt(b"second").unwrap();

        assert!(receiver.decrypt(&second).is_err());
    }

    #[test]
    fn test_nonce_exhaustion() {
        let mut state = CipherState::new(&KEY_A);
        state.nonce = u64::MAX;
        assert!(matches!(
            state.encrypt(b"late"),
            Err(CipherError::NonceExhausted)
        ));
    }

    #[test]
    fn test_initiator_assignment() {
        let mut slot = CipherStates::default();
        slot.assign(Role::Initiator, CipherState::new(&KEY_A), CipherState::new(&KEY_B))
            .unwrap();
        let (mut encrypt, mut decrypt) = slot.into_pair().unwrap();

        let ciphertext = encrypt.encrypt(b"to responder").unwrap();
        assert!(CipherState::new(&KEY_A).decrypt(&ciphertext).is_ok());

        let ciphertext = CipherState::new(&KEY_B).encrypt(b"to initiator").unwrap();
        assert_eq!(decrypt.decrypt(&ciphertext).unwrap(), b"to initiator");
    }

    #[test]
    fn test_responder_assignment() {
        let mut slot = CipherStates::default();
        slot.assign(Role::Responder, CipherState::new(&KEY_A), CipherState::new(&KEY_B))
            .unwrap();
        let (mut encrypt, mut decrypt) = slot.into_pair().unwrap();

        let ciphertext = encrypt.encrypt(b"to initiator").unwrap();
        assert!(CipherState::new(&KEY_B).decrypt(&ciphertext).is_ok());

        let ciphertext = CipherState::new(&KEY_A).encrypt(b"to responder").unwrap();
        assert_eq!(decrypt.decrypt(&ciphertext).unwrap(), b"to responder");
    }

    #[test]
    fn test_second_assignment_fails_closed() {
        let mut slot = CipherStates::default();
        slot.assign(Role::Initiator, CipherState::new(&KEY_A), CipherState::new(&KEY_B))
            .unwrap();

        let err = slot
            .assign(Role::Initiator, CipherState::new(&KEY_B), CipherState::new(&KEY_A))
            .unwrap_err();
        assert!(matches!(err, HandshakeError::InvariantViolation(_)));

        // The first assignment is kept.
        let (mut encrypt, _) = slot.into_pair().unwrap();
        let ciphertext = encrypt.encrypt(b"still a").unwrap();
        assert!(CipherState::new(&KEY_A).decrypt(&ciphertext).is_ok());
    }
}
