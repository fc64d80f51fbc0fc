//! Noise XX channel upgrade for Tether.
//!
//! This crate provides:
//! - Ed25519 identity keys and peer ids
//! - Identity binding payloads that tie a session's Noise key to an identity
//! - The handshake orchestrator that turns an insecure framed stream into
//!   a pair of directional cipher states
//!
//! # Design
//!
//! Uses the Noise XX pattern (`Noise_XX_25519_ChaChaPoly_SHA256`) which provides:
//! - Mutual authentication (both peers prove identity)
//! - Identity hiding (identity payloads travel encrypted)
//! - Forward secrecy (fresh Noise keys per session)
//!
//! # Example
//!
//! ```no_run
//! use tether_noise::{FramedConn, IdentityKeypair, Session};
//! use tokio::net::TcpStream;
//!
//! # async fn dial() -> anyhow::Result<()> {
//! let identity = IdentityKeypair::generate();
//! let mut conn = FramedConn::new(TcpStream::connect("127.0.0.1:7700").await?);
//!
//! let mut session = Session::initiator(&identity, None)?;
//! session.run(&mut conn).await?;
//!
//! let mut secured = session.into_secured().expect("secured after run");
//! let ciphertext = secured.encrypt(b"hello")?;
//! conn.write_frame(&ciphertext).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod cipher;
pub mod config;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod noise;
pub mod payload;
pub mod transport;

pub use cipher::{CipherError, CipherState};
pub use config::HandshakeConfig;
pub use error::HandshakeError;
pub use handshake::{Role, SecuredSession, Session};
pub use identity::{IdentityKeypair, PeerId, PublicKey};
pub use transport::FramedConn;
