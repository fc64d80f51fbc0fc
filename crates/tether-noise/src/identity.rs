//! Ed25519 identity keys and peer ids.
//!
//! A **peer id** is a multihash of the marshalled identity public key: the
//! key is inlined (identity hash) when its encoding fits in 42 bytes and
//! hashed with SHA2-256 otherwise. Ed25519 keys always take the inline form,
//! so a peer id can be turned back into the key it names.
//!
//! Peer ids are displayed as base64url without padding.
//!
//! # Example
//!
//! ```
//! use tether_noise::identity::IdentityKeypair;
//!
//! let keypair = IdentityKeypair::generate();
//! let peer_id = keypair.peer_id();
//! println!("peer id: {}", peer_id);
//!
//! let signature = keypair.sign(b"challenge");
//! assert!(keypair.public_key().verify(b"challenge", &signature));
//! ```

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use prost::Message;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::str::FromStr;
use thiserror::Error;
use zeroize::Zeroize;

/// Multihash code for the identity (inline) hash.
const MULTIHASH_IDENTITY: u8 = 0x00;

/// Multihash code for SHA2-256.
const MULTIHASH_SHA2_256: u8 = 0x12;

/// Marshalled keys up to this length are inlined into the peer id.
const MAX_INLINE_KEY_LEN: usize = 42;

/// Errors from decoding a marshalled public key.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("malformed public key record: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("unsupported key type: {0}")]
    UnsupportedType(i32),

    #[error("invalid ed25519 public key")]
    InvalidKey,
}

/// Key algorithms known to the marshalled key format.
///
/// Only Ed25519 keys are accepted; the other tags are listed so that a
/// peer offering them is reported as unsupported rather than malformed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum KeyType {
    Rsa = 0,
    Ed25519 = 1,
    Secp256k1 = 2,
    Ecdsa = 3,
}

/// Wire record for a marshalled public key.
#[derive(Clone, PartialEq, prost::Message)]
struct PublicKeyRecord {
    #[prost(enumeration = "KeyType", tag = "1")]
    key_type: i32,
    #[prost(bytes = "vec", tag = "2")]
    data: Vec<u8>,
}

/// Peer id: multihash of a marshalled identity public key.
///
/// Deserialization goes through [`PeerId::from_bytes`], so a decoded id is
/// always a well-formed multihash.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct PeerId(Vec<u8>);

impl PeerId {
    /// Derive the peer id of a public key.
    pub fn from_public_key(key: &PublicKey) -> Self {
        let encoded = key.marshal();
        let mut bytes = Vec::with_capacity(2 + encoded.len().max(32));

        if encoded.len() <= MAX_INLINE_KEY_LEN {
            bytes.push(MULTIHASH_IDENTITY);
            bytes.push(encoded.len() as u8);
            bytes.extend_from_slice(&encoded);
        } else {
            let digest = Sha256::digest(&encoded);
            bytes.push(MULTIHASH_SHA2_256);
            bytes.push(digest.len() as u8);
            bytes.extend_from_slice(&digest);
        }

        Self(bytes)
    }

    /// Parse a peer id from its string representation.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .context("invalid base64url encoding")?;

        Self::from_bytes(bytes)
    }

    /// Validate raw multihash bytes as a peer id.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < 2 {
            anyhow::bail!("peer id too short: {} bytes", bytes.len());
        }

        let code = bytes[0];
        let digest_len = bytes[1] as usize;
        if digest_len != bytes.len() - 2 {
            anyhow::bail!(
                "invalid peer id length: header says {} bytes, got {}",
                digest_len,
                bytes.len() - 2
            );
        }

        match code {
            MULTIHASH_IDENTITY if digest_len <= MAX_INLINE_KEY_LEN => {}
            MULTIHASH_SHA2_256 if digest_len == 32 => {}
            _ => anyhow::bail!("unsupported peer id multihash code {:#04x}", code),
        }

        Ok(Self(bytes))
    }

    /// Get the raw multihash bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Recover the public key from an inline peer id.
    ///
    /// Returns `None` for hashed peer ids.
    pub fn public_key(&self) -> Option<Result<PublicKey, KeyError>> {
        match self.0.split_first() {
            Some((&MULTIHASH_IDENTITY, [_, key @ ..])) => Some(PublicKey::unmarshal(key)),
            _ => None,
        }
    }
}

impl TryFrom<Vec<u8>> for PeerId {
    type Error = anyhow::Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        Self::from_bytes(bytes)
    }
}

impl From<PeerId> for Vec<u8> {
    fn from(peer_id: PeerId) -> Self {
        peer_id.0
    }
}

impl FromStr for PeerId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(&self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

/// Ed25519 identity public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Create from raw public key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| KeyError::InvalidKey)
    }

    /// Get the raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Serialize into the tagged key record carried in handshake payloads.
    pub fn marshal(&self) -> Vec<u8> {
        PublicKeyRecord {
            key_type: KeyType::Ed25519 as i32,
            data: self.0.as_bytes().to_vec(),
        }
        .encode_to_vec()
    }

    /// Parse a tagged key record produced by [`PublicKey::marshal`].
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, KeyError> {
        let record = PublicKeyRecord::decode(bytes)?;

        match KeyType::try_from(record.key_type) {
            Ok(KeyType::Ed25519) => {}
            _ => return Err(KeyError::UnsupportedType(record.key_type)),
        }

        let raw: [u8; 32] = record
            .data
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidKey)?;
        Self::from_bytes(&raw)
    }

    /// Verify a signature made by this key.
    ///
    /// Malformed signatures verify as `false`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let sig = match Signature::from_slice(signature) {
            Ok(s) => s,
            Err(_) => return false,
        };
        self.0.verify_strict(message, &sig).is_ok()
    }

    /// Derive the peer id for this key.
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", URL_SAFE_NO_PAD.encode(self.as_bytes()))
    }
}

/// Ed25519 identity keypair.
///
/// The long-term network identity of a peer. The signing key is zeroized
/// on drop by `ed25519-dalek`.
pub struct IdentityKeypair {
    signing_key: SigningKey,
}

impl IdentityKeypair {
    /// Generate a new random keypair using the OS CSPRNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create from raw signing key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        Self { signing_key }
    }

    /// Get the public half of this identity.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key())
    }

    /// Get the peer id of this identity.
    pub fn peer_id(&self) -> PeerId {
        self.public_key().peer_id()
    }

    /// Get the private key bytes.
    ///
    /// # Security
    /// Handle with care! These bytes can recreate the identity.
    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign a message with this identity.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Save keypair to files.
    ///
    /// Private key is saved with restricted permissions (0600 on Unix).
    pub fn save(&self, private_path: &str, public_path: &str) -> Result<()> {
        let mut private_bytes = self.private_key_bytes();
        let public_key = self.public_key();

        let written = fs::write(private_path, private_bytes);
        private_bytes.zeroize();
        written.with_context(|| format!("failed to write {}", private_path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(private_path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(private_path, perms)?;
        }

        fs::write(public_path, public_key.as_bytes())
            .with_context(|| format!("failed to write {}", public_path))?;

        Ok(())
    }

    /// Load keypair from private key file.
    pub fn load(private_path: &str) -> Result<Self> {
        let mut bytes = fs::read(private_path).context("failed to read private key")?;

        if bytes.len() != 32 {
            bytes.zeroize();
            anyhow::bail!("invalid private key length: expected 32 bytes");
        }

        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&bytes);
        bytes.zeroize();

        let keypair = Self::from_bytes(&key_bytes);
        key_bytes.zeroize();

        Ok(keypair)
    }

    /// Load only the public key.
    pub fn load_public(public_path: &str) -> Result<PublicKey> {
        let bytes = fs::read(public_path).context("failed to read public key")?;

        let key_bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("invalid public key length: expected 32 bytes"))?;

        PublicKey::from_bytes(&key_bytes).context("invalid public key")
    }
}
