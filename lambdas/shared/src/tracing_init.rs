//! Tracing setup for the Lambda functions
//!
//! JSON output for CloudWatch Logs. The level comes from `RUST_LOG` and
//! defaults to `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Call once at the start of `main`, before the runtime starts
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(false)
        .without_time()
        .flatten_event(true);

    // A subscriber may already be installed when running under a test harness
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
