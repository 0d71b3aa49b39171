//! Tracing setup.
//!
//! Logs go to stderr so stdout stays parseable. `RUST_LOG` takes
//! precedence over the `[logging]` section:
//!
//! ```bash
//! RUST_LOG=debug mdrag index
//! RUST_LOG=mdrag_core::index=debug mdrag index
//! ```

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Install the global subscriber. Only the first call takes effect.
pub fn init(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::try_new(&config.default).unwrap_or_else(|_| EnvFilter::new("warn"))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_filter(filter);

        // Another subscriber may already be installed (e.g. by a test harness).
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}
