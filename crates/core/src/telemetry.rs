use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is unset. The HTTP transport logs every
/// request at debug/trace, which drowns out the polling loops.
const DEFAULT_FILTER: &str = "info,alloy_transport_http=warn,hyper_util=warn";

/// Initialise the global tracing subscriber.
///
/// Respects `RUST_LOG` env var; otherwise falls back to [`DEFAULT_FILTER`].
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fmt().with_env_filter(filter).with_target(true).init();
}
