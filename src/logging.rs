//! Process-wide tracing subscriber.
//!
//! `RUST_LOG` wins over the configured `log.level`. Output goes to stderr
//! so command output on stdout stays machine-readable.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the subscriber. Calling it twice is harmless.
pub fn init(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
