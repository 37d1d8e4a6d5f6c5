//! Logging setup
//!
//! Installs the tracing subscriber used by binaries and tests embedding the
//! engine. Honors `RUST_LOG` when set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "multicam=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
