//! In-process overlay network
//!
//! [`MemoryOverlay`] plays the role of the I2P router: sessions created from
//! it can bind listeners on their destination and dial each other. Streams
//! are `tokio::io::duplex` pairs tagged with the destinations of both ends.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use garlic_transport::address::MIN_DESTINATION_LEN;
use garlic_transport::{Destination, OverlaySession, RawListener, RawStream};
use parking_lot::Mutex;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

use crate::fixtures::destination_from_bytes;

const STREAM_BUFFER: usize = 64 * 1024;

type Registry = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<MemoryStream>>>>;

/// Counts how many times something was closed
#[derive(Debug, Clone, Default)]
pub struct CloseCounter(Arc<AtomicUsize>);

impl CloseCounter {
    /// Number of closes recorded so far
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Identity key material for a memory session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryKeys {
    seed: [u8; 32],
}

impl MemoryKeys {
    /// Fresh random keys
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self { seed }
    }

    /// Deterministic keys
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { seed }
    }

    /// Destination these keys own on `port`
    pub fn destination(&self, port: u16) -> Destination {
        let mut bytes: Vec<u8> = self
            .seed
            .iter()
            .copied()
            .cycle()
            .take(MIN_DESTINATION_LEN)
            .collect();
        bytes[..2].copy_from_slice(&port.to_be_bytes());
        destination_from_bytes(bytes)
    }
}

/// In-process stand-in for an I2P router
#[derive(Debug, Clone, Default)]
pub struct MemoryOverlay {
    registry: Registry,
}

impl MemoryOverlay {
    /// Empty overlay
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session owning `keys` on `port`.
    pub fn session(&self, keys: MemoryKeys, port: u16) -> MemorySession {
        let destination = keys.destination(port);
        MemorySession {
            registry: Arc::clone(&self.registry),
            keys,
            port,
            destination,
            hang_dials: AtomicBool::new(false),
            dials: AtomicUsize::new(0),
        }
    }

    /// Whether some listener is bound on `destination`
    pub fn is_bound(&self, destination: &Destination) -> bool {
        self.registry.lock().contains_key(destination.as_str())
    }

    /// Push a stream claiming to come from `remote` into the listener bound
    /// on `to`. Returns the far end and the close counter of the delivered
    /// stream. `remote` is not validated.
    pub fn deliver_raw(
        &self,
        to: &Destination,
        remote: &str,
    ) -> io::Result<(MemoryStream, CloseCounter)> {
        let inbound = self.inbound_sender(to.as_str())?;
        let (delivered, far) = MemoryStream::pair(to.as_str(), remote);
        let closes = delivered.closes.clone();
        inbound
            .send(delivered)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "listener is gone"))?;
        Ok((far, closes))
    }

    fn inbound_sender(&self, destination: &str) -> io::Result<mpsc::UnboundedSender<MemoryStream>> {
        self.registry
            .lock()
            .get(destination)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "destination unreachable"))
    }
}

/// Session bound to one identity and port
#[derive(Debug)]
pub struct MemorySession {
    registry: Registry,
    keys: MemoryKeys,
    port: u16,
    destination: Destination,
    hang_dials: AtomicBool,
    dials: AtomicUsize,
}

impl MemorySession {
    /// Destination of this session
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Make every later dial wait forever, like an unresponsive router.
    pub fn hang_dials(&self) {
        self.hang_dials.store(true, Ordering::SeqCst);
    }

    /// Number of dials that reached the session
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OverlaySession for MemorySession {
    type Keys = MemoryKeys;
    type Stream = MemoryStream;
    type Listener = MemoryListener;
    type Error = io::Error;

    async fn dial(&self, destination: &Destination) -> Result<Self::Stream, Self::Error> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.hang_dials.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let inbound = {
            let registry = self.registry.lock();
            registry.get(destination.as_str()).cloned()
        };
        let inbound = inbound.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "destination unreachable")
        })?;

        let (near, far) = MemoryStream::pair(self.destination.as_str(), destination.as_str());
        inbound
            .send(far)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "listener is gone"))?;
        Ok(near)
    }

    async fn listen(&self) -> Result<Self::Listener, Self::Error> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        {
            let mut registry = self.registry.lock();
            if registry.contains_key(self.destination.as_str()) {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "destination already has a listener",
                ));
            }
            registry.insert(self.destination.to_string(), inbound_tx);
        }

        Ok(MemoryListener {
            registry: Arc::clone(&self.registry),
            local: self.destination.to_string(),
            inbound: tokio::sync::Mutex::new(inbound_rx),
            closed: AtomicBool::new(false),
            closes: CloseCounter::default(),
        })
    }

    fn local_destination(&self, keys: &Self::Keys, port: u16) -> Result<String, Self::Error> {
        if keys != &self.keys || port != self.port {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "keys and port do not match this session",
            ));
        }
        Ok(self.destination.to_string())
    }
}

/// Listener registered on a session's destination
#[derive(Debug)]
pub struct MemoryListener {
    registry: Registry,
    local: String,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryStream>>,
    closed: AtomicBool,
    closes: CloseCounter,
}

impl MemoryListener {
    /// Counter of closes that reached this listener
    pub fn close_counter(&self) -> CloseCounter {
        self.closes.clone()
    }
}

#[async_trait]
impl RawListener for MemoryListener {
    type Stream = MemoryStream;
    type Error = io::Error;

    async fn accept(&self) -> Result<Self::Stream, Self::Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed"));
        }
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "listener closed"))
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.record();
            self.registry.lock().remove(&self.local);
        }
        Ok(())
    }

    fn local_destination(&self) -> &str {
        &self.local
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.registry.lock().remove(&self.local);
        }
    }
}

/// One end of an in-process overlay stream
///
/// Records a close the first time it is shut down or, failing that, when it
/// is dropped.
#[derive(Debug)]
pub struct MemoryStream {
    inner: DuplexStream,
    local: String,
    remote: String,
    closed: bool,
    closes: CloseCounter,
}

impl MemoryStream {
    /// Connected pair: the first end is at `local`, the second at `remote`.
    pub fn pair(local: &str, remote: &str) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(STREAM_BUFFER);
        (Self::new(a, local, remote), Self::new(b, remote, local))
    }

    fn new(inner: DuplexStream, local: &str, remote: &str) -> Self {
        Self {
            inner,
            local: local.to_string(),
            remote: remote.to_string(),
            closed: false,
            closes: CloseCounter::default(),
        }
    }

    /// Counter of closes of this end
    pub fn close_counter(&self) -> CloseCounter {
        self.closes.clone()
    }

    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.record();
        }
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
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

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.mark_closed();
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

impl RawStream for MemoryStream {
    fn local_destination(&self) -> &str {
        &self.local
    }

    fn remote_destination(&self) -> &str {
        &self.remote
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.mark_closed();
    }
}
