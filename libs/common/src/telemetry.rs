//! Telemetry and logging initialization

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize tracing/logging for the process.
///
/// Filtering comes from `RUST_LOG`; when unset, `info` plus debug output
/// for the engine crates. `CONDUCTOR_LOG_FORMAT=json` switches to JSON
/// output for log shippers, otherwise the pretty format is used.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,conductor_engine=debug,conductor_server=debug"));

    let fmt_layer = if std::env::var("CONDUCTOR_LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer().pretty().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
