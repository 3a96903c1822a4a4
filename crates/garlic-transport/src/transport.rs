//! Garlic transport construction, dialing and listening
//!
//! [`build_transport`] derives the local listen address from an overlay
//! session and returns a [`TransportBuilder`]; supplying an [`Upgrader`]
//! yields a [`GarlicTransport`].
//!
//! Each connection moves through `RawEstablished -> AddressResolved ->
//! Upgraded -> Open`. A failure at any step before `Open` ends the attempt and
//! releases the raw stream before the error is returned. Nothing is retried
//! here.

use std::fmt;
use std::sync::Arc;

use crate::address::{to_layered, LayeredAddress, GARLIC64};
use crate::config::TransportConfig;
use crate::connection::Connection;
use crate::context::DialContext;
use crate::error::{TransportError, TransportResult};
use crate::listener::{release, TransportListener};
use crate::session::{OverlaySession, RawListener, RawStream};
use crate::upgrade::{Role, Upgrader};

const PROTOCOLS: &[&str] = &[GARLIC64];

/// Derive the listen address for `keys` on `listen_port` and return the
/// transport constructor together with that address.
pub fn build_transport<S: OverlaySession>(
    session: Arc<S>,
    keys: &S::Keys,
    listen_port: u16,
) -> TransportResult<(TransportBuilder<S>, LayeredAddress)> {
    build_transport_with_config(session, keys, TransportConfig::with_listen_port(listen_port))
}

/// [`build_transport`] with explicit configuration.
pub fn build_transport_with_config<S: OverlaySession>(
    session: Arc<S>,
    keys: &S::Keys,
    config: TransportConfig,
) -> TransportResult<(TransportBuilder<S>, LayeredAddress)> {
    config.validate()?;

    let native = session
        .local_destination(keys, config.listen_port)
        .map_err(|e| TransportError::build("session could not derive a local destination", e))?;
    let listen_address = to_layered(&native)
        .map_err(|e| TransportError::build("session returned an unusable destination", e))?;

    tracing::info!(
        listen_address = %listen_address,
        listen_port = config.listen_port,
        "garlic transport built"
    );

    let builder = TransportBuilder {
        session,
        config,
        local_address: listen_address.clone(),
    };
    Ok((builder, listen_address))
}

/// Curried transport constructor awaiting an upgrader
pub struct TransportBuilder<S> {
    session: Arc<S>,
    config: TransportConfig,
    local_address: LayeredAddress,
}

impl<S: OverlaySession> TransportBuilder<S> {
    /// Finish construction with the security and multiplexing upgrader.
    pub fn with_upgrader<U: Upgrader<S::Stream>>(self, upgrader: U) -> GarlicTransport<S, U> {
        GarlicTransport {
            session: self.session,
            upgrader: Arc::new(upgrader),
            config: self.config,
            local_address: self.local_address,
        }
    }

    /// Listen address derived at build time
    pub fn local_address(&self) -> &LayeredAddress {
        &self.local_address
    }
}

impl<S> fmt::Debug for TransportBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBuilder")
            .field("config", &self.config)
            .field("local_address", &self.local_address)
            .finish_non_exhaustive()
    }
}

/// Transport that dials and listens over a garlic session
///
/// Cheap to clone; clones share the session and upgrader.
pub struct GarlicTransport<S, U> {
    session: Arc<S>,
    upgrader: Arc<U>,
    config: TransportConfig,
    local_address: LayeredAddress,
}

impl<S, U> Clone for GarlicTransport<S, U> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            upgrader: Arc::clone(&self.upgrader),
            config: self.config.clone(),
            local_address: self.local_address.clone(),
        }
    }
}

impl<S, U> fmt::Debug for GarlicTransport<S, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GarlicTransport")
            .field("config", &self.config)
            .field("local_address", &self.local_address)
            .finish_non_exhaustive()
    }
}

impl<S, U> GarlicTransport<S, U>
where
    S: OverlaySession,
    U: Upgrader<S::Stream>,
{
    /// Dial `remote` and upgrade the stream as initiator.
    ///
    /// `cx` bounds both the session dial and the upgrade. When it carries no
    /// deadline the configured dial timeout applies.
    pub async fn dial(
        &self,
        cx: &DialContext,
        remote: &LayeredAddress,
        expected_peer: Option<U::PeerId>,
    ) -> TransportResult<U::Output> {
        let destination = remote.to_destination()?;
        let cx = cx.clone().or_timeout(self.config.dial_timeout());

        let raw = cx
            .run("session dial", self.session.dial(&destination))
            .await?
            .map_err(|e| TransportError::dial(format!("session could not reach {remote}"), e))?;

        if cx.is_cancelled() {
            release(raw).await;
            return Err(TransportError::cancelled(
                "dial context cancelled after the raw stream was established",
            ));
        }

        let conn = addressed(raw).await?;
        let connection_id = conn.id();
        tracing::debug!(
            connection_id = %connection_id,
            local = %conn.local_address(),
            remote = %conn.remote_address(),
            expected_peer = ?expected_peer,
            "raw garlic stream established, upgrading"
        );

        let upgraded = cx
            .run(
                "upgrade",
                self.upgrader.upgrade(conn, Role::Initiator, expected_peer),
            )
            .await?
            .map_err(|e| {
                TransportError::upgrade(format!("{} upgrade with {remote} failed", Role::Initiator), e)
            })?;

        tracing::debug!(connection_id = %connection_id, "outbound garlic connection open");
        Ok(upgraded)
    }

    /// Bind a listener whose accepted connections are upgraded as responder.
    pub async fn listen(
        &self,
        local: &LayeredAddress,
    ) -> TransportResult<GarlicListener<S::Listener, U>> {
        if !self.can_dial(local) {
            return Err(TransportError::address_format(format!(
                "cannot listen on {local}, expected a /{GARLIC64} address"
            )));
        }

        let raw = self
            .session
            .listen()
            .await
            .map_err(|e| TransportError::accept("session could not bind a listener", e))?;
        let inner = TransportListener::new(raw)?;

        if inner.multiaddr() != local {
            tracing::warn!(
                requested = %local,
                bound = %inner.multiaddr(),
                "listener bound to a different destination than requested"
            );
        }

        Ok(GarlicListener {
            inner,
            upgrader: Arc::clone(&self.upgrader),
        })
    }
}

impl<S, U> GarlicTransport<S, U> {
    /// Whether `address` belongs to the family this transport serves
    pub fn can_dial(&self, address: &LayeredAddress) -> bool {
        address.is_garlic()
    }

    /// Protocol tags this transport handles
    pub fn protocols(&self) -> &'static [&'static str] {
        PROTOCOLS
    }

    /// Garlic routing is a transport, not a proxy
    pub fn proxy(&self) -> bool {
        false
    }

    /// Listen address derived at build time
    pub fn local_address(&self) -> &LayeredAddress {
        &self.local_address
    }

    /// Shared overlay session
    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    /// Configuration in effect
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

/// Resolve both ends of a raw stream, releasing it if either fails.
async fn addressed<R: RawStream>(raw: R) -> TransportResult<Connection<R>> {
    let resolved = to_layered(raw.local_destination())
        .and_then(|local| Ok((local, to_layered(raw.remote_destination())?)));

    match resolved {
        Ok((local, remote)) => Connection::new(raw, local, remote),
        Err(err) => {
            release(raw).await;
            Err(err)
        }
    }
}

/// Listener adapter that upgrades every accepted connection
pub struct GarlicListener<L, U> {
    inner: TransportListener<L>,
    upgrader: Arc<U>,
}

impl<L, U> GarlicListener<L, U>
where
    L: RawListener,
    U: Upgrader<L::Stream>,
{
    /// Accept the next connection and upgrade it as responder.
    pub async fn accept(&self) -> TransportResult<U::Output> {
        let conn = self.inner.accept().await?;
        let connection_id = conn.id();
        let remote = conn.remote_address().clone();

        match self.upgrader.upgrade(conn, Role::Responder, None).await {
            Ok(upgraded) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    remote = %remote,
                    "inbound garlic connection open"
                );
                Ok(upgraded)
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    remote = %remote,
                    error = %e,
                    "inbound upgrade failed"
                );
                Err(TransportError::upgrade(
                    format!("{} upgrade with {remote} failed", Role::Responder),
                    e,
                ))
            }
        }
    }

    /// Close the underlying listener.
    pub async fn close(&self) -> TransportResult<()> {
        self.inner.close().await
    }

    /// Native destination of the listener
    pub fn addr(&self) -> &str {
        self.inner.addr()
    }

    /// Layered address of the listener
    pub fn multiaddr(&self) -> &LayeredAddress {
        self.inner.multiaddr()
    }
}

impl<L, U> fmt::Debug for GarlicListener<L, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GarlicListener")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
