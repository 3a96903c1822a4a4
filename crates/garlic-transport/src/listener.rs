//! Listener that produces addressed connections
//!
//! [`TransportListener`] wraps a raw overlay listener. Its own layered address
//! is resolved once at construction; each accepted stream gets its remote
//! address resolved before it is handed out as a [`Connection`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

use crate::address::{to_layered, LayeredAddress};
use crate::connection::Connection;
use crate::error::{TransportError, TransportResult};
use crate::session::{RawListener, RawStream};

/// Raw overlay listener plus its cached layered address
pub struct TransportListener<L> {
    raw: L,
    address: LayeredAddress,
    closed: AtomicBool,
    close_signal: Notify,
}

impl<L: RawListener> TransportListener<L> {
    /// Wrap `raw`, resolving its bound destination.
    ///
    /// A listener that cannot describe its own address is not returned.
    pub fn new(raw: L) -> TransportResult<Self> {
        let address = to_layered(raw.local_destination())?;
        tracing::info!(address = %address, "garlic listener bound");

        Ok(Self {
            raw,
            address,
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        })
    }

    /// Wait for the next inbound connection.
    ///
    /// Fails with `Accept` once the listener is closed, including for a call
    /// that was already waiting when `close` ran.
    pub async fn accept(&self) -> TransportResult<Connection<L::Stream>> {
        let closed = self.close_signal.notified();
        tokio::pin!(closed);
        closed.as_mut().enable();
        if self.is_closed() {
            return Err(TransportError::listener_closed());
        }

        let raw = tokio::select! {
            () = &mut closed => return Err(TransportError::listener_closed()),
            accepted = self.raw.accept() => {
                accepted.map_err(|e| TransportError::accept("raw listener accept failed", e))?
            }
        };

        let remote = match to_layered(raw.remote_destination()) {
            Ok(remote) => remote,
            Err(err) => {
                tracing::warn!(
                    listener = %self.address,
                    error = %err,
                    "dropping inbound stream with unresolvable remote destination"
                );
                release(raw).await;
                return Err(err);
            }
        };

        let conn = Connection::new(raw, self.address.clone(), remote)?;
        tracing::debug!(
            connection_id = %conn.id(),
            remote = %conn.remote_address(),
            "accepted garlic connection"
        );
        Ok(conn)
    }

    /// Close the raw listener.
    ///
    /// Only the first call reaches the raw listener; later calls return `Ok`.
    pub async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.close_signal.notify_waiters();

        self.raw
            .close()
            .await
            .map_err(|e| TransportError::accept("raw listener close failed", e))?;
        tracing::info!(address = %self.address, "garlic listener closed");
        Ok(())
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Native destination the listener is bound to
    pub fn addr(&self) -> &str {
        self.raw.local_destination()
    }

    /// Layered address resolved at construction
    pub fn multiaddr(&self) -> &LayeredAddress {
        &self.address
    }
}

impl<L> fmt::Debug for TransportListener<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportListener")
            .field("address", &self.address)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Shut a stream down that will never be wrapped.
pub(crate) async fn release<S: RawStream>(mut raw: S) {
    if let Err(e) = raw.shutdown().await {
        tracing::debug!(error = %e, "failed to shut down released raw stream");
    }
}
