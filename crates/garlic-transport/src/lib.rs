//! Garlic Transport
//!
//! Dial and listen over an I2P session as if it were any other
//! layered-address transport. Native destinations are translated to
//! `/garlic64/<destination>` addresses and back, raw overlay streams are
//! wrapped as addressed [`Connection`]s, and every connection is passed through
//! a security and multiplexing [`Upgrader`] before callers see it.
//!
//! The overlay session and the upgrader are collaborators, consumed through
//! the [`OverlaySession`] and [`Upgrader`] traits.

pub mod address;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod listener;
pub mod session;
pub mod transport;
pub mod upgrade;

// Public API - curated exports only
pub use address::{to_layered, to_native, Destination, LayeredAddress, Protocol, GARLIC64};
pub use config::TransportConfig;
pub use connection::{Connection, ConnectionId};
pub use context::{CancelHandle, DialContext};
pub use error::{BoxError, ErrorKind, TransportError, TransportResult};
pub use listener::TransportListener;
pub use session::{OverlaySession, RawListener, RawStream};
pub use transport::{
    build_transport, build_transport_with_config, GarlicListener, GarlicTransport,
    TransportBuilder,
};
pub use upgrade::{CapableConnection, Role, Upgrader};
