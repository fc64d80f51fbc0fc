//! Identity binding payload.
//!
//! Messages 2 and 3 of the handshake each carry one payload proving that
//! the sender's long-term identity key owns the session's Noise static key:
//!
//! ```text
//! message IdentityBindingPayload {
//!     bytes identity_key = 1;   // marshalled identity public key
//!     bytes identity_sig = 2;   // sign(SIGNATURE_PREFIX || noise static public key)
//! }
//! ```
//!
//! Unknown fields are skipped on decode.

use prost::Message;
use tracing::debug;

use crate::error::HandshakeError;
use crate::identity::{IdentityKeypair, PeerId, PublicKey};

/// Prepended to the Noise static key before signing with the identity key.
pub const SIGNATURE_PREFIX: &[u8] = b"noise-libp2p-static-key:";

/// Largest payload accepted from a peer before any decoding happens.
pub const MAX_PAYLOAD_LEN: usize = 4096;

/// Signed `{identity key, signature}` record.
#[derive(Clone, PartialEq, prost::Message)]
pub struct IdentityBindingPayload {
    #[prost(bytes = "vec", tag = "1")]
    identity_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    identity_sig: Vec<u8>,
}

impl IdentityBindingPayload {
    pub fn identity_key(&self) -> &[u8] {
        &self.identity_key
    }

    pub fn identity_sig(&self) -> &[u8] {
        &self.identity_sig
    }
}

fn signed_message(noise_static: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(SIGNATURE_PREFIX.len() + noise_static.len());
    msg.extend_from_slice(SIGNATURE_PREFIX);
    msg.extend_from_slice(noise_static);
    msg
}

/// Build and serialize this side's payload for the given session key.
pub fn make_payload(identity: &IdentityKeypair, local_noise_static: &[u8]) -> Vec<u8> {
    let signature = identity.sign(&signed_message(local_noise_static));

    IdentityBindingPayload {
        identity_key: identity.public_key().marshal(),
        identity_sig: signature.to_vec(),
    }
    .encode_to_vec()
}

/// Check a remote payload against the remote's Noise static key.
///
/// On success returns the remote's verified peer id and identity key.
pub fn verify_payload(
    payload: &[u8],
    remote_noise_static: &[u8],
    expected_peer: Option<&PeerId>,
    max_len: usize,
) -> Result<(PeerId, PublicKey), HandshakeError> {
    if payload.len() > max_len {
        return Err(HandshakeError::PayloadDecode(format!(
            "payload of {} bytes exceeds limit of {}",
            payload.len(),
            max_len
        )));
    }

    let record = IdentityBindingPayload::decode(payload)
        .map_err(|e| HandshakeError::PayloadDecode(e.to_string()))?;

    let remote_key = PublicKey::unmarshal(&record.identity_key)?;
    let peer_id = remote_key.peer_id();

    // if we know who we're trying to reach, make sure we have the right peer
    if let Some(expected) = expected_peer {
        if *expected != peer_id {
            return Err(HandshakeError::IdentityMismatch {
                expected: expected.clone(),
                actual: peer_id,
            });
        }
    }

    if !remote_key.verify(&signed_message(remote_noise_static), &record.identity_sig) {
        return Err(HandshakeError::SignatureInvalid);
    }

    debug!(peer = %peer_id, "verified identity binding payload");
    Ok((peer_id, remote_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::generate_keypair;

    #[test]
    fn test_valid_payload_verifies() {
        let identity = IdentityKeypair::generate();
        let noise = generate_keypair().unwrap();

        let payload = make_payload(&identity, noise.public());
        let (peer_id, key) =
            verify_payload(&payload, noise.public(), None, MAX_PAYLOAD_LEN).unwrap();

        assert_eq!(peer_id, identity.peer_id());
        assert_eq!(key, identity.public_key());
    }

    #[test]
    fn test_expected_peer_accepted() {
        let identity = IdentityKeypair::generate();
        let noise = generate_keypair().unwrap();

        let payload = make_payload(&identity, noise.public());
        let expected = identity.peer_id();
        let (peer_id, _) =
            verify_payload(&payload, noise.public(), Some(&expected), MAX_PAYLOAD_LEN).unwrap();
        assert_eq!(peer_id, expected);
    }

    #[test]
    fn test_expected_peer_mismatch() {
        let identity = IdentityKeypair::generate();
        let noise = generate_keypair().unwrap();
        let someone_else = IdentityKeypair::generate().peer_id();

        let payload = make_payload(&identity, noise.public());
        let err = verify_payload(&payload, noise.public(), Some(&someone_else), MAX_PAYLOAD_LEN)
            .unwrap_err();

        match err {
            HandshakeError::IdentityMismatch { expected, actual } => {
                assert_eq!(expected, someone_else);
                assert_eq!(actual, identity.peer_id());
            }
            other => panic!("expected identity mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_signature_from_other_key_rejected() {
        let claimed = IdentityKeypair::generate();
        let signer = IdentityKeypair::generate();
        let noise = generate_keypair().unwrap();

        let forged = IdentityBindingPayload {
            identity_key: claimed.public_key().marshal(),
            identity_sig: signer.sign(&signed_message(noise.public())).to_vec(),
        }
        .encode_to_vec();

        let err = verify_payload(&forged, noise.public(), None, MAX_PAYLOAD_LEN).unwrap_err();
        assert!(matches!(err, HandshakeError::SignatureInvalid));
    }

    #[test]
    fn test_signature_over_other_noise_key_rejected() {
        let identity = IdentityKeypair::generate();
        let signed_for = generate_keypair().unwrap();
        let presented = generate_keypair().unwrap();

        let payload = make_payload(&identity, signed_for.public());
        let err = verify_payload(&payload, presented.public(), None, MAX_PAYLOAD_LEN).unwrap_err();
        assert!(matches!(err, HandshakeError::SignatureInvalid));
    }

    #[test]
    fn test_signature_without_prefix_rejected() {
        let identity = IdentityKeypair::generate();
        let noise = generate_keypair().unwrap();

        let payload = IdentityBindingPayload {
            identity_key: identity.public_key().marshal(),
            identity_sig: identity.sign(noise.public()).to_vec(),
        }
        .encode_to_vec();

        let err = verify_payload(&payload, noise.public(), None, MAX_PAYLOAD_LEN).unwrap_err();
        assert!(matches!(err, HandshakeError::SignatureInvalid));
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let identity = IdentityKeypair::generate();
        let noise = generate_keypair().unwrap();

        let mut record = IdentityBindingPayload::decode(
            make_payload(&identity, noise.public()).as_slice(),
        )
        .unwrap();
        record.identity_sig.truncate(10);

        let err = verify_payload(&record.encode_to_vec(), noise.public(), None, MAX_PAYLOAD_LEN)
            .unwrap_err();
        assert!(matches!(err, HandshakeError::SignatureInvalid));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let noise = generate_keypair().unwrap();
        let err = verify_payload(&[0xff; 12], noise.public(), None, MAX_PAYLOAD_LEN).unwrap_err();
        assert!(matches!(err, HandshakeError::PayloadDecode(_)));
    }

    #[test]
    fn test_oversized_payload_rejected_before_decode() {
        let identity = IdentityKeypair::generate();
        let noise = generate_keypair().unwrap();

        let payload = make_payload(&identity, noise.public());
        let err = verify_payload(&payload, noise.public(), None, payload.len() - 1).unwrap_err();
        assert!(matches!(err, HandshakeError::PayloadDecode(_)));
    }

    #[test]
    fn test_missing_key_is_unsupported() {
        let noise = generate_keypair().unwrap();
        // An empty record decodes with default fields.
        let err = verify_payload(&[], noise.public(), None, MAX_PAYLOAD_LEN).unwrap_err();
        assert!(matches!(err, HandshakeError::UnsupportedKey(_)));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let identity = IdentityKeypair::generate();
        let noise = generate_keypair().unwrap();

        let mut payload = make_payload(&identity, noise.public());
        // field 15, length-delimited, 3 bytes
        payload.extend_from_slice(&[0x7a, 0x03, 0x01, 0x02, 0x03]);

        let (peer_id, _) =
            verify_payload(&payload, noise.public(), None, MAX_PAYLOAD_LEN).unwrap();
        assert_eq!(peer_id, identity.peer_id());
    }

    #[test]
    fn test_payload_fields() {
        let identity = IdentityKeypair::generate();
        let noise = generate_keypair().unwrap();

        let record = IdentityBindingPayload::decode(
            make_payload(&identity, noise.public()).as_slice(),
        )
        .unwrap();
        assert_eq!(record.identity_key(), identity.public_key().marshal().as_slice());
        assert_eq!(record.identity_sig().len(), 64);
    }
}
