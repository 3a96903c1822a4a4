//! Addressed raw connections
//!
//! A [`Connection`] is a raw overlay stream plus the layered addresses of both
//! ends, captured once when the stream was obtained. It is what the upgrade
//! step consumes. Reads and writes go straight to the raw stream.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use uuid::Uuid;

use crate::address::LayeredAddress;
use crate::error::{TransportError, TransportResult};
use crate::session::RawStream;

/// Identifier used to correlate log lines for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh connection identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0.simple())
    }
}

/// Raw overlay stream with its resolved local and remote addresses
///
/// Owns the stream exclusively. The addresses never change for the life of
/// the connection.
pub struct Connection<S> {
    id: ConnectionId,
    raw: S,
    local: LayeredAddress,
    remote: LayeredAddress,
    closed: bool,
}

impl<S: RawStream> Connection<S> {
    /// Wrap `raw` with the addresses of both ends.
    ///
    /// Both addresses must belong to the garlic family.
    pub fn new(raw: S, local: LayeredAddress, remote: LayeredAddress) -> TransportResult<Self> {
        for (side, address) in [("local", &local), ("remote", &remote)] {
            if !address.is_garlic() {
                return Err(TransportError::address_format(format!(
                    "{side} address {address} is not a garlic64 address"
                )));
            }
        }

        Ok(Self {
            id: ConnectionId::new(),
            raw,
            local,
            remote,
            closed: false,
        })
    }

    /// Close the raw stream.
    ///
    /// Only the first call reaches the raw stream; later calls return `Ok`.
    pub async fn close(&mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

impl<S> Connection<S> {
    /// Log correlation id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Address of this end
    pub fn local_address(&self) -> &LayeredAddress {
        &self.local
    }

    /// Address of the peer
    pub fn remote_address(&self) -> &LayeredAddress {
        &self.remote
    }

    /// Whether `close` (or a shutdown) already completed
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<S: RawStream> AsyncRead for Connection<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().raw).poll_read(cx, buf)
    }
}

impl<S: RawStream> AsyncWrite for Connection<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().raw).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().raw).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Ok(()));
        }

        let result = futures::ready!(Pin::new(&mut this.raw).poll_shutdown(cx));
        this.closed = true;
        tracing::trace!(connection_id = %this.id, "raw stream closed");
        Poll::Ready(result)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().raw).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.raw.is_write_vectored()
    }
}
