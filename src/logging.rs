use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable console lines
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
}

impl LogFormat {
    /// Reads `LOG_FORMAT`; anything other than `json` selects the console format.
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,health_monitor=trace
pub fn init() {
    init_with_format(LogFormat::from_env());
}

/// Same as [`init`] with an explicit output format.
pub fn init_with_format(format: LogFormat) {
    INIT.call_once(|| {
        // Default to 'info' level if RUST_LOG is not set
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(filter);
        match format {
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .init(),
            LogFormat::Pretty => registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true) // concurrency debugging
                        .with_line_number(true),
                )
                .init(),
        }

        tracing::info!(format = ?format, "Logging initialized");
    });
}

/// Macro for logging rate limiting decisions
#[macro_export]
macro_rules! rate_limit_event {
    ($key:expr, $allowed:expr, $limit:expr, $remaining:expr, $window:expr) => {
        tracing::info!(
            key = $key,
            allowed = $allowed,
            limit = $limit,
            remaining = $remaining,
            window_seconds = $window,
            "Rate limit check"
        )
    };
}

/// Macro for logging storage operations with timing
#[macro_export]
macro_rules! storage_op {
    ($operation:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Storage operation"
        )
    };
}
