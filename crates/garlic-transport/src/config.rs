//! Transport Configuration
//!
//! Minimal settings for building a garlic transport, loadable from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TransportError, TransportResult};

/// Settings for [`build_transport_with_config`](crate::build_transport_with_config)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Overlay port the session listens on. I2P treats 0 as "any port".
    pub listen_port: u16,

    /// Upper bound for a dial, session dial and upgrade together, when the
    /// caller's context has no deadline. 0 disables it.
    pub dial_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            // Tunnel builds can take tens of seconds on a cold router
            dial_timeout_ms: 60_000,
        }
    }
}

impl TransportConfig {
    /// Default configuration on a specific overlay port
    pub fn with_listen_port(listen_port: u16) -> Self {
        Self {
            listen_port,
            ..Default::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> TransportResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| TransportError::build("invalid transport configuration", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> TransportResult<()> {
        // Anything shorter can't cover a single tunnel round trip
        if self.dial_timeout_ms != 0 && self.dial_timeout_ms < 1_000 {
            return Err(TransportError::build(
                "invalid transport configuration",
                format!(
                    "dial_timeout_ms must be 0 or at least 1000, got {}",
                    self.dial_timeout_ms
                ),
            ));
        }
        Ok(())
    }

    /// Default dial timeout, if enabled
    pub fn dial_timeout(&self) -> Option<Duration> {
        (self.dial_timeout_ms > 0).then(|| Duration::from_millis(self.dial_timeout_ms))
    }
}
