//! Garlic Testkit
//!
//! In-process doubles for the collaborators of `garlic-transport`:
//! an overlay network with sessions, listeners and duplex streams that count
//! their closes, and a plaintext upgrader that exchanges peer ids and exposes
//! a single stream per connection. Nothing here touches a real I2P router.

pub mod fixtures;
pub mod overlay;
pub mod upgrader;

pub use fixtures::{destination_from_seed, init_tracing, random_destination};
pub use overlay::{CloseCounter, MemoryKeys, MemoryListener, MemoryOverlay, MemorySession, MemoryStream};
pub use upgrader::{PeerId, PlaintextConnection, PlaintextUpgrader, UpgradeError};
