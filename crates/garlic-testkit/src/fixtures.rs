//! Test fixtures

use garlic_transport::address::MIN_DESTINATION_LEN;
use garlic_transport::Destination;
use rand::RngCore;
use tracing_subscriber::EnvFilter;

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Destination filled with `seed`
pub fn destination_from_seed(seed: u8) -> Destination {
    destination_from_bytes(vec![seed; MIN_DESTINATION_LEN])
}

/// Destination with random contents
pub fn random_destination() -> Destination {
    let mut bytes = vec![0u8; MIN_DESTINATION_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    destination_from_bytes(bytes)
}

pub(crate) fn destination_from_bytes(bytes: Vec<u8>) -> Destination {
    match Destination::from_bytes(&bytes) {
        Ok(destination) => destination,
        Err(e) => unreachable!("{MIN_DESTINATION_LEN}-byte destinations are always valid: {e}"),
    }
}
