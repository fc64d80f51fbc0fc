//! Length-delimited framing for handshake messages.
//!
//! # Wire Format
//!
//! ```text
//! [2 bytes: length, big-endian] [length bytes: Noise message]
//! ```
//!
//! Frames carry whole Noise messages, so 65535 bytes is also the largest
//! frame. The stream underneath is untrusted and unencrypted.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame payload.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Insecure connection exchanging whole, in-order frames.
#[derive(Debug)]
pub struct FramedConn<S> {
    stream: S,
}

impl<S> FramedConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Write one frame and flush it.
    pub async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let len = u16::try_from(frame.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds {}", frame.len(), MAX_FRAME_LEN),
            )
        })?;

        let mut buf = Vec::with_capacity(2 + frame.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(frame);

        self.stream.write_all(&buf).await?;
        self.stream.flush().await
    }

    /// Read one whole frame.
    pub async fn read_frame(&mut self) -> io::Result<Vec<u8>> {
        let len = self.stream.read_u16().await? as usize;
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await?;
        Ok(buf)
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
