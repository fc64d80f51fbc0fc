//! Handshake configuration.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::noise::MAX_NOISE_MESSAGE_LEN;
use crate::payload::MAX_PAYLOAD_LEN;

/// Default time allowed for the whole 3-message exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Per-session handshake settings.
///
/// Missing fields take their defaults when deserialized:
///
/// ```json
/// { "handshake_timeout_ms": 5000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Deadline for the whole exchange, in milliseconds.
    pub handshake_timeout_ms: u64,

    /// Largest identity binding payload accepted from a peer.
    pub max_payload_len: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            max_payload_len: MAX_PAYLOAD_LEN,
        }
    }
}

impl HandshakeConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.handshake_timeout_ms == 0 {
            anyhow::bail!("handshake_timeout_ms must be greater than zero");
        }
        if self.max_payload_len == 0 || self.max_payload_len > MAX_NOISE_MESSAGE_LEN {
            anyhow::bail!(
                "max_payload_len must be between 1 and {}, got {}",
                MAX_NOISE_MESSAGE_LEN,
                self.max_payload_len
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HandshakeConfig::default();
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_payload_len, MAX_PAYLOAD_LEN);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: HandshakeConfig =
            serde_json::from_str(r#"{ "handshake_timeout_ms": 2500 }"#).unwrap();
        assert_eq!(config.handshake_timeout(), Duration::from_millis(2500));
        assert_eq!(config.max_payload_len, MAX_PAYLOAD_LEN);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let zero_timeout = HandshakeConfig {
            handshake_timeout_ms: 0,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());

        let huge_payload = HandshakeConfig {
            max_payload_len: MAX_NOISE_MESSAGE_LEN + 1,
            ..Default::default()
        };
        assert!(huge_payload.validate().is_err());
    }

    #[test]
    fn test_with_timeout() {
        let config = HandshakeConfig::default().with_timeout(Duration::from_millis(750));
        assert_eq!(config.handshake_timeout_ms, 750);
    }
}
