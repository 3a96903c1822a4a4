//! Overlay session collaborator traits
//!
//! The adapter never speaks the overlay protocol itself. It only needs a
//! session that can dial a destination, bind a listener and name its own
//! destination, plus raw streams and listeners that report the destinations
//! on either end.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::address::Destination;

/// Unupgraded overlay byte stream
///
/// Dropping the stream releases the overlay handle; `poll_shutdown` closes it
/// explicitly.
pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Destination text of this end of the stream
    fn local_destination(&self) -> &str;

    /// Destination text of the peer
    fn remote_destination(&self) -> &str;
}

/// Unupgraded overlay listener
#[async_trait]
pub trait RawListener: Send + Sync + 'static {
    /// Streams produced by this listener
    type Stream: RawStream;
    /// Listener failure
    type Error: std::error::Error + Send + Sync + 'static;

    /// Wait for the next inbound stream.
    async fn accept(&self) -> Result<Self::Stream, Self::Error>;

    /// Close the listener. Pending and later `accept` calls must fail.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Destination text the listener is bound to
    fn local_destination(&self) -> &str;
}

/// Long-lived handle to an overlay client
#[async_trait]
pub trait OverlaySession: Send + Sync + 'static {
    /// Identity key material the session derives destinations from
    type Keys: Send + Sync;
    /// Outbound and inbound stream type
    type Stream: RawStream;
    /// Listener type
    type Listener: RawListener<Stream = Self::Stream>;
    /// Session failure
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a raw stream to `destination`.
    async fn dial(&self, destination: &Destination) -> Result<Self::Stream, Self::Error>;

    /// Bind a raw listener on the session's own destination.
    async fn listen(&self) -> Result<Self::Listener, Self::Error>;

    /// Destination text for `keys` on overlay port `port`.
    fn local_destination(&self, keys: &Self::Keys, port: u16) -> Result<String, Self::Error>;
}
