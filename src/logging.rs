use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Output format of the global subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    /// `LOG_FORMAT=json` selects JSON lines, anything else the console format
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(value) if value.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initialize the logging system.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,replaygate=trace
pub fn init(format: LogFormat) {
    INIT.call_once(|| {
        // Default to 'info' level if not specified
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(filter);
        match format {
            LogFormat::Json => registry
                .with(fmt::layer().json().with_current_span(false))
                .init(),
            LogFormat::Pretty => registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_line_number(true),
                )
                .init(),
        }

        tracing::info!(?format, "Logging initialized");
    });
}

/// Macro for logging admission decisions
#[macro_export]
macro_rules! decision_event {
    ($key:expr, $limiter:expr, $decision:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            key = $key,
            limiter = $limiter,
            allowed = $decision.allowed,
            remaining = $decision.remaining,
            elapsed_ms = $elapsed_ms,
            "Rate limit check"
        )
    };
}

/// Macro for logging storage operations with timing
#[macro_export]
macro_rules! storage_op {
    ($backend:expr, $operation:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            backend = $backend,
            operation = $operation,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Storage operation"
        )
    };
}
