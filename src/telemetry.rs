//! Tracing initialization.
//!
//! Structured logs to stdout via tracing-subscriber. RUST_LOG overrides the
//! configured default level.

use crate::error::{Error, Result};

/// Initialize the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber was already installed.
pub fn init_tracing(default_level: &str) -> Result<()> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;

    Ok(())
}
