//! Security and multiplexing upgrade collaborator traits

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::address::LayeredAddress;
use crate::connection::Connection;
use crate::session::RawStream;

/// Which side of the handshake this end plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Dialing side
    Initiator,
    /// Accepting side
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => f.write_str("initiator"),
            Self::Responder => f.write_str("responder"),
        }
    }
}

/// Turns a raw [`Connection`] into a secured, multiplexed connection.
///
/// Identity checks against `expected_peer` belong to the upgrader. When the
/// upgrade fails the connection must be released; dropping it closes the raw
/// stream.
#[async_trait]
pub trait Upgrader<S: RawStream>: Send + Sync + 'static {
    /// Remote identity type
    type PeerId: Clone + fmt::Debug + Send + Sync + 'static;
    /// Upgraded connection
    type Output: CapableConnection<PeerId = Self::PeerId>;
    /// Handshake or muxer failure
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run the handshake and muxer negotiation over `conn`.
    async fn upgrade(
        &self,
        conn: Connection<S>,
        role: Role,
        expected_peer: Option<Self::PeerId>,
    ) -> Result<Self::Output, Self::Error>;
}

/// Connection that can open and accept independent streams
#[async_trait]
pub trait CapableConnection: Send + Sync + 'static {
    /// Remote identity type
    type PeerId;
    /// Multiplexed stream
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    /// Stream or close failure
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open an outbound stream.
    async fn open_stream(&self) -> Result<Self::Stream, Self::Error>;

    /// Wait for the peer to open a stream.
    async fn accept_stream(&self) -> Result<Self::Stream, Self::Error>;

    /// Address of this end
    fn local_address(&self) -> &LayeredAddress;

    /// Address of the peer
    fn remote_address(&self) -> &LayeredAddress;

    /// Authenticated peer identity
    fn remote_peer(&self) -> &Self::PeerId;

    /// Close the connection and every stream on it.
    async fn close(&self) -> Result<(), Self::Error>;
}
