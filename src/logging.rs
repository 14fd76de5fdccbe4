//! Tracing initialization for embedding applications.
//!
//! The bridge itself only emits `tracing` events; hosts that want them on
//! stderr can call [`init_tracing`] once at startup. Filtering follows the
//! standard `RUST_LOG` conventions (e.g. `RUST_LOG=toolbridge=debug`).

use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber honoring `RUST_LOG`.
///
/// Safe to call when a global subscriber is already set; the second call is
/// a no-op rather than a panic.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
