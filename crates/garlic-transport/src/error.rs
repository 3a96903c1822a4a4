//! Transport errors
//!
//! Every failure the adapter reports is a [`TransportError`]. Each variant is
//! one error kind and keeps the collaborator error that caused it as its
//! `source`, so overlay diagnostics (unreachable destination, exhausted
//! session) survive the trip up to the caller. Match on [`TransportError::kind`]
//! rather than on the message text.

use std::fmt;

/// Boxed collaborator error kept as the cause of a [`TransportError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Standard Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Error kinds reported by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed address or wrong protocol family
    AddressFormat,
    /// The session could not reach the destination
    Dial,
    /// Listener-level failure
    Accept,
    /// Security handshake or multiplexer negotiation failed
    Upgrade,
    /// No usable local destination at setup time
    Build,
    /// The dial context was cancelled or its deadline passed
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AddressFormat => "address format",
            Self::Dial => "dial",
            Self::Accept => "accept",
            Self::Upgrade => "upgrade",
            Self::Build => "build",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Unified error type for the garlic transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Malformed or mismatched-protocol address. Not retryable until the
    /// caller fixes its input.
    #[error("Address format error: {message}")]
    AddressFormat {
        /// What was wrong with the address
        message: String,
        /// Decoder error, if any
        #[source]
        source: Option<BoxError>,
    },

    /// The session failed to reach the destination
    #[error("Dial failed: {message}")]
    Dial {
        /// Which destination could not be reached
        message: String,
        /// Session error
        #[source]
        source: Option<BoxError>,
    },

    /// The listener failed; usually fatal to the accept loop
    #[error("Accept failed: {message}")]
    Accept {
        /// Description of the listener failure
        message: String,
        /// Raw listener error
        #[source]
        source: Option<BoxError>,
    },

    /// Handshake or multiplexer negotiation failed; the raw stream is gone
    /// and the caller must redial
    #[error("Upgrade failed: {message}")]
    Upgrade {
        /// Which side of the upgrade failed
        message: String,
        /// Upgrader error
        #[source]
        source: Option<BoxError>,
    },

    /// The session could not produce a usable local destination
    #[error("Build failed: {message}")]
    Build {
        /// Description of the setup failure
        message: String,
        /// Session or translation error
        #[source]
        source: Option<BoxError>,
    },

    /// The dial was cancelled or ran past its deadline
    #[error("Cancelled: {message}")]
    Cancelled {
        /// Where the cancellation was observed
        message: String,
    },
}

impl TransportError {
    /// Create an address format error
    pub fn address_format(message: impl Into<String>) -> Self {
        Self::AddressFormat {
            message: message.into(),
            source: None,
        }
    }

    /// Create a dial error wrapping the session failure
    pub fn dial(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Dial {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an accept error wrapping the listener failure
    pub fn accept(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Accept {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an accept error for a listener that was already closed
    pub fn listener_closed() -> Self {
        Self::Accept {
            message: "listener is closed".to_string(),
            source: None,
        }
    }

    /// Create an upgrade error wrapping the upgrader failure
    pub fn upgrade(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Upgrade {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a build error wrapping the setup failure
    pub fn build(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Build {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Attach a cause to an error built without one
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        match &mut self {
            Self::AddressFormat { source, .. }
            | Self::Dial { source, .. }
            | Self::Accept { source, .. }
            | Self::Upgrade { source, .. }
            | Self::Build { source, .. } => *source = Some(cause.into()),
            Self::Cancelled { .. } => {}
        }
        self
    }

    /// Kind tag of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AddressFormat { .. } => ErrorKind::AddressFormat,
            Self::Dial { .. } => ErrorKind::Dial,
            Self::Accept { .. } => ErrorKind::Accept,
            Self::Upgrade { .. } => ErrorKind::Upgrade,
            Self::Build { .. } => ErrorKind::Build,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Whether the caller may retry the same operation unchanged.
    ///
    /// The adapter itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Dial | ErrorKind::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn test_kind_and_source_are_preserved() {
        let cause = io::Error::new(io::ErrorKind::ConnectionRefused, "tunnel build failed");
        let err = TransportError::dial("destination unreachable", cause);

        assert_eq!(err.kind(), ErrorKind::Dial);
        assert!(err.is_retryable());

        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("tunnel build failed"));
    }

    #[test]
    fn test_with_source_attaches_cause() {
        let err = TransportError::address_format("bad tag")
            .with_source(io::Error::new(io::ErrorKind::InvalidData, "garbage"));

        assert_eq!(err.kind(), ErrorKind::AddressFormat);
        assert!(!err.is_retryable());
        assert!(err.source().is_some());
    }

    #[test]
    fn test_closed_listener_is_accept_kind() {
        let err = TransportError::listener_closed();
        assert_eq!(err.kind(), ErrorKind::Accept);
        assert!(err.source().is_none());
        assert_eq!(err.to_string(), "Accept failed: listener is closed");
    }
}
