//! Logging setup
//!
//! Structured logging via `tracing`. Embedders that already install their
//! own subscriber skip this and the crate's spans flow into it.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with env-filter support.
///
/// Honors `RUST_LOG`; defaults to `info` globally with `debug` for this
/// crate. Calling this twice panics, so embedders with their own
/// subscriber should not call it at all.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dispatchline=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
