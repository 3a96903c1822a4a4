//! Plaintext upgrader
//!
//! Stand-in for a real security handshake and muxer. Both sides send their
//! 32-byte peer id in the clear and read the other's; the initiator checks
//! the id it expected. The resulting connection carries exactly one stream:
//! the first `open_stream` or `accept_stream` takes the raw connection.

use std::fmt;
use std::io;

use async_trait::async_trait;
use garlic_transport::{CapableConnection, Connection, LayeredAddress, RawStream, Role, Upgrader};
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Opaque 32-byte peer identity
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Random identity
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

/// Plaintext handshake and single-stream failures
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    /// The raw connection failed mid-handshake
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The remote presented another identity than the one dialed
    #[error("Peer mismatch: expected {expected}, got {actual}")]
    PeerMismatch {
        /// Identity the initiator asked for
        expected: PeerId,
        /// Identity the remote presented
        actual: PeerId,
    },

    /// The connection's only stream was already taken
    #[error("Connection carries a single stream and it is already in use")]
    StreamsExhausted,
}

/// Upgrader that authenticates nothing beyond the announced peer id
#[derive(Debug, Clone)]
pub struct PlaintextUpgrader {
    local_peer: PeerId,
}

impl PlaintextUpgrader {
    /// Upgrader announcing `local_peer`
    pub fn new(local_peer: PeerId) -> Self {
        Self { local_peer }
    }

    /// Identity this upgrader announces
    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }
}

#[async_trait]
impl<S: RawStream> Upgrader<S> for PlaintextUpgrader {
    type PeerId = PeerId;
    type Output = PlaintextConnection<S>;
    type Error = UpgradeError;

    async fn upgrade(
        &self,
        mut conn: Connection<S>,
        role: Role,
        expected_peer: Option<PeerId>,
    ) -> Result<Self::Output, Self::Error> {
        conn.write_all(&self.local_peer.0).await?;
        conn.flush().await?;

        let mut remote = [0u8; 32];
        conn.read_exact(&mut remote).await?;
        let remote_peer = PeerId(remote);

        if let Some(expected) = expected_peer {
            if expected != remote_peer {
                if let Err(e) = conn.close().await {
                    tracing::debug!(connection_id = %conn.id(), error = %e, "close after peer mismatch failed");
                }
                return Err(UpgradeError::PeerMismatch {
                    expected,
                    actual: remote_peer,
                });
            }
        }

        tracing::trace!(connection_id = %conn.id(), %role, %remote_peer, "plaintext handshake done");
        Ok(PlaintextConnection {
            local_address: conn.local_address().clone(),
            remote_address: conn.remote_address().clone(),
            remote_peer,
            stream: Mutex::new(Some(conn)),
        })
    }
}

/// Upgraded connection carrying one stream
pub struct PlaintextConnection<S> {
    local_address: LayeredAddress,
    remote_address: LayeredAddress,
    remote_peer: PeerId,
    stream: Mutex<Option<Connection<S>>>,
}

impl<S: RawStream> PlaintextConnection<S> {
    async fn take_stream(&self) -> Result<Connection<S>, UpgradeError> {
        self.stream
            .lock()
            .await
            .take()
            .ok_or(UpgradeError::StreamsExhausted)
    }
}

impl<S> fmt::Debug for PlaintextConnection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaintextConnection")
            .field("local_address", &self.local_address)
            .field("remote_address", &self.remote_address)
            .field("remote_peer", &self.remote_peer)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: RawStream> CapableConnection for PlaintextConnection<S> {
    type PeerId = PeerId;
    type Stream = Connection<S>;
    type Error = UpgradeError;

    async fn open_stream(&self) -> Result<Self::Stream, Self::Error> {
        self.take_stream().await
    }

    async fn accept_stream(&self) -> Result<Self::Stream, Self::Error> {
        self.take_stream().await
    }

    fn local_address(&self) -> &LayeredAddress {
        &self.local_address
    }

    fn remote_address(&self) -> &LayeredAddress {
        &self.remote_address
    }

    fn remote_peer(&self) -> &PeerId {
        &self.remote_peer
    }

    async fn close(&self) -> Result<(), Self::Error> {
        let conn = self.stream.lock().await.take();
        if let Some(mut conn) = conn {
            conn.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::pin::Pin;
    use std::task::{Context, Poll};

    use assert_matches::assert_matches;
    use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

    use super::*;
    use crate::fixtures::random_destination;

    /// Duplex end whose shutdown always fails
    struct BrokenShutdown {
        inner: DuplexStream,
        local: String,
        remote: String,
    }

    impl AsyncRead for BrokenShutdown {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for BrokenShutdown {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_flush(cx)
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other("shutdown refused")))
        }
    }

    impl RawStream for BrokenShutdown {
        fn local_destination(&self) -> &str {
            &self.local
        }

        fn remote_destination(&self) -> &str {
            &self.remote
        }
    }

    fn broken_pair() -> (Connection<BrokenShutdown>, DuplexStream) {
        let local = random_destination();
        let remote = random_destination();
        let (ours, theirs) = tokio::io::duplex(1024);
        let raw = BrokenShutdown {
            inner: ours,
            local: local.as_str().to_string(),
            remote: remote.as_str().to_string(),
        };
        let conn = Connection::new(raw, local.to_layered(), remote.to_layered()).unwrap();
        (conn, theirs)
    }

    #[tokio::test]
    async fn test_peer_mismatch_survives_failed_close() {
        let (conn, mut far) = broken_pair();
        let actual = PeerId::random();
        far.write_all(&actual.0).await.unwrap();

        let expected = PeerId::random();
        let result = PlaintextUpgrader::new(PeerId::random())
            .upgrade(conn, Role::Initiator, Some(expected))
            .await;

        assert_matches!(
            result,
            Err(UpgradeError::PeerMismatch { expected: e, actual: a }) if e == expected && a == actual
        );
    }

    #[tokio::test]
    async fn test_upgrade_exchanges_peer_ids() {
        let (conn, mut far) = broken_pair();
        let local = PeerId::random();
        let remote = PeerId::random();
        far.write_all(&remote.0).await.unwrap();

        let upgraded = PlaintextUpgrader::new(local)
            .upgrade(conn, Role::Responder, None)
            .await
            .unwrap();
        assert_eq!(upgraded.remote_peer(), &remote);

        let mut announced = [0u8; 32];
        far.read_exact(&mut announced).await.unwrap();
        assert_eq!(PeerId(announced), local);

        let _stream = upgraded.accept_stream().await.unwrap();
        assert_matches!(upgraded.open_stream().await, Err(UpgradeError::StreamsExhausted));
    }
}
