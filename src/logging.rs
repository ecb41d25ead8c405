//! Tracing initialization for the CLI.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize tracing.
///
/// `RUST_LOG` takes precedence; otherwise everything at `level` and above is
/// logged. Calling this more than once is a no-op.
pub fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init();
}
