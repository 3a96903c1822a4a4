//! End-to-end tests for the garlic transport over the in-process overlay
//!
//! - Listen/dial between two sessions with matching addresses on both sides
//! - Stream round trip through the upgraded connections
//! - Cancellation and deadlines against an unresponsive session
//! - Error kinds for bad addresses, unreachable peers and failed upgrades

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use garlic_testkit::{
    init_tracing, random_destination, MemoryKeys, MemoryOverlay, MemorySession, PeerId,
    PlaintextUpgrader,
};
use garlic_transport::{
    build_transport, build_transport_with_config, CapableConnection, DialContext, ErrorKind,
    GarlicTransport, LayeredAddress, OverlaySession, TransportConfig, TransportError,
    TransportListener,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

// =============================================================================
// Test Helpers
// =============================================================================

struct Node {
    session: Arc<MemorySession>,
    transport: GarlicTransport<MemorySession, PlaintextUpgrader>,
    listen_addr: LayeredAddress,
    peer: PeerId,
}

fn node(overlay: &MemoryOverlay, port: u16) -> Node {
    let keys = MemoryKeys::generate();
    let session = Arc::new(overlay.session(keys.clone(), port));
    let (builder, listen_addr) = build_transport(Arc::clone(&session), &keys, port).unwrap();

    let peer = PeerId::random();
    let transport = builder.with_upgrader(PlaintextUpgrader::new(peer));
    Node {
        session,
        transport,
        listen_addr,
        peer,
    }
}

// =============================================================================
// End-to-end
// =============================================================================

#[tokio::test]
async fn test_listen_then_dial_exchanges_payload() {
    init_tracing();
    let overlay = MemoryOverlay::new();
    let server = node(&overlay, 45793);
    let client = node(&overlay, 23459);

    let listener = server.transport.listen(&server.listen_addr).await.unwrap();
    assert_eq!(listener.multiaddr(), &server.listen_addr);
    assert_eq!(listener.addr(), server.session.destination().as_str());

    for _ in 0..5 {
        let cx = DialContext::new();
        let (dialed, accepted) = tokio::join!(
            client
                .transport
                .dial(&cx, &server.listen_addr, Some(server.peer)),
            listener.accept(),
        );
        let dialed = dialed.unwrap();
        let accepted = accepted.unwrap();

        // Each side's local address is the other side's remote address
        assert_eq!(accepted.local_address(), &server.listen_addr);
        assert_eq!(dialed.remote_address(), accepted.local_address());
        assert_eq!(dialed.local_address(), accepted.remote_address());
        assert_eq!(dialed.local_address(), &client.listen_addr);
        assert_eq!(dialed.remote_peer(), &server.peer);
        assert_eq!(accepted.remote_peer(), &client.peer);

        let mut outbound = dialed.open_stream().await.unwrap();
        let mut inbound = accepted.accept_stream().await.unwrap();

        outbound.write_all(b"Hello!").await.unwrap();
        outbound.flush().await.unwrap();
        let mut buf = [0u8; 6];
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"Hello!");

        let reply = accepted.local_address().to_string();
        inbound.write_all(reply.as_bytes()).await.unwrap();
        inbound.close().await.unwrap();

        let mut echoed = String::new();
        outbound.read_to_string(&mut echoed).await.unwrap();
        assert_eq!(echoed, server.listen_addr.to_string());
        outbound.close().await.unwrap();
    }

    listener.close().await.unwrap();
    assert_matches!(listener.accept().await, Err(e) if e.kind() == ErrorKind::Accept);
}

#[tokio::test]
async fn test_single_stream_per_plaintext_connection() {
    let overlay = MemoryOverlay::new();
    let server = node(&overlay, 1);
    let client = node(&overlay, 2);
    let listener = server.transport.listen(&server.listen_addr).await.unwrap();

    let cx = DialContext::new();
    let (dialed, accepted) = tokio::join!(
        client.transport.dial(&cx, &server.listen_addr, None),
        listener.accept(),
    );
    let dialed = dialed.unwrap();
    let _accepted = accepted.unwrap();

    let _stream = dialed.open_stream().await.unwrap();
    assert!(dialed.open_stream().await.is_err());
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_expired_deadline_returns_promptly() {
    let overlay = MemoryOverlay::new();
    let server = node(&overlay, 1);
    let client = node(&overlay, 2);
    client.session.hang_dials();

    let cx = DialContext::new().with_deadline(Instant::now());
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.transport.dial(&cx, &server.listen_addr, None),
    )
    .await
    .expect("dial must not block past its deadline");

    assert_matches!(result, Err(e) if e.kind() == ErrorKind::Cancelled);
    assert_eq!(client.session.dial_count(), 0);
}

#[tokio::test]
async fn test_deadline_interrupts_unresponsive_session() {
    let overlay = MemoryOverlay::new();
    let server = node(&overlay, 1);
    let client = node(&overlay, 2);
    client.session.hang_dials();

    let cx = DialContext::new().with_timeout(Duration::from_millis(50));
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.transport.dial(&cx, &server.listen_addr, None),
    )
    .await
    .expect("dial must not block past its deadline");

    assert_matches!(result, Err(TransportError::Cancelled { .. }));
    assert_eq!(client.session.dial_count(), 1);
}

#[tokio::test]
async fn test_cancel_handle_aborts_dial() {
    let overlay = MemoryOverlay::new();
    let server = node(&overlay, 1);
    let client = node(&overlay, 2);
    client.session.hang_dials();

    let (cx, handle) = DialContext::new().cancellable();
    let dial = client.transport.dial(&cx, &server.listen_addr, None);
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
    };
    let (result, ()) = tokio::join!(dial, cancel);

    assert!(result.unwrap_err().is_retryable());
}

#[tokio::test]
async fn test_configured_timeout_applies_without_context_deadline() {
    let overlay = MemoryOverlay::new();
    let server = node(&overlay, 1);

    let keys = MemoryKeys::generate();
    let session = Arc::new(overlay.session(keys.clone(), 2));
    session.hang_dials();
    let config = TransportConfig {
        listen_port: 2,
        dial_timeout_ms: 1_000,
    };
    let (builder, _) = build_transport_with_config(Arc::clone(&session), &keys, config).unwrap();
    let client = builder.with_upgrader(PlaintextUpgrader::new(PeerId::random()));

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        client.dial(&DialContext::new(), &server.listen_addr, None),
    )
    .await
    .expect("configured timeout must bound the dial");

    assert_matches!(result, Err(e) if e.kind() == ErrorKind::Cancelled);
}

// =============================================================================
// Raw stream release
// =============================================================================

#[tokio::test]
async fn test_deadline_during_upgrade_closes_raw_stream() {
    let overlay = MemoryOverlay::new();
    let server = node(&overlay, 1);
    let client = node(&overlay, 2);

    // Accepts raw streams but never answers the handshake
    let raw_listener = TransportListener::new(server.session.listen().await.unwrap()).unwrap();

    let cx = DialContext::new().with_timeout(Duration::from_millis(100));
    let (dialed, accepted) = tokio::join!(
        client.transport.dial(&cx, &server.listen_addr, None),
        raw_listener.accept(),
    );
    assert_matches!(dialed, Err(e) if e.kind() == ErrorKind::Cancelled);

    // The initiator's peer id arrives, then EOF once the dialer let go
    let mut accepted = accepted.unwrap();
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), accepted.read_to_end(&mut received))
        .await
        .expect("dialer must release the raw stream")
        .unwrap();
    assert_eq!(received.len(), 32);
}

#[tokio::test]
async fn test_failed_responder_upgrade_closes_raw_stream() {
    let overlay = MemoryOverlay::new();
    let server = node(&overlay, 1);
    let listener = server.transport.listen(&server.listen_addr).await.unwrap();

    let remote = random_destination();
    let (far, closes) = overlay
        .deliver_raw(server.session.destination(), remote.as_str())
        .unwrap();
    drop(far);

    let err = listener.accept().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upgrade);
    assert_eq!(closes.get(), 1);

    // The listener survives a failed handshake
    assert!(overlay.is_bound(server.session.destination()));
}

// =============================================================================
// Error kinds
// =============================================================================

#[tokio::test]
async fn test_dial_rejects_foreign_address_without_touching_session() {
    let overlay = MemoryOverlay::new();
    let client = node(&overlay, 2);
    let tcp: LayeredAddress = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();

    assert!(!client.transport.can_dial(&tcp));
    let err = client
        .transport
        .dial(&DialContext::new(), &tcp, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AddressFormat);
    assert_eq!(client.session.dial_count(), 0);
}

#[tokio::test]
async fn test_dial_to_unbound_destination_is_dial_error() {
    let overlay = MemoryOverlay::new();
    let server = node(&overlay, 1);
    let client = node(&overlay, 2);

    let err = client
        .transport
        .dial(&DialContext::new(), &server.listen_addr, None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Dial);
    assert!(err.is_retryable());
    let cause = std::error::Error::source(&err).unwrap();
    assert_eq!(cause.to_string(), "destination unreachable");
}

#[tokio::test]
async fn test_wrong_expected_peer_is_upgrade_error() {
    let overlay = MemoryOverlay::new();
    let server = node(&overlay, 1);
    let client = node(&overlay, 2);
    let listener = server.transport.listen(&server.listen_addr).await.unwrap();

    let cx = DialContext::new();
    let (dialed, _accepted) = tokio::join!(
        client
            .transport
            .dial(&cx, &server.listen_addr, Some(PeerId::random())),
        listener.accept(),
    );

    let err = dialed.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upgrade);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_listen_rejects_foreign_address() {
    let overlay = MemoryOverlay::new();
    let server = node(&overlay, 1);
    let tcp: LayeredAddress = "/ip6/::1/tcp/4001".parse().unwrap();

    let err = server.transport.listen(&tcp).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AddressFormat);
    assert!(!overlay.is_bound(server.session.destination()));
}

#[tokio::test]
async fn test_second_listen_on_same_session_is_accept_error() {
    let overlay = MemoryOverlay::new();
    let server = node(&overlay, 1);
    let _listener = server.transport.listen(&server.listen_addr).await.unwrap();

    let err = server.transport.listen(&server.listen_addr).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Accept);
}

#[test]
fn test_build_with_foreign_keys_is_build_error() {
    let overlay = MemoryOverlay::new();
    let session = Arc::new(overlay.session(MemoryKeys::generate(), 1));

    let err = build_transport(session, &MemoryKeys::generate(), 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Build);
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn test_transport_capabilities() {
    let overlay = MemoryOverlay::new();
    let client = node(&overlay, 2);

    assert_eq!(client.transport.protocols(), &["garlic64"]);
    assert!(!client.transport.proxy());
    assert!(client.transport.can_dial(&client.listen_addr));
    assert_eq!(client.transport.local_address(), &client.listen_addr);
}
