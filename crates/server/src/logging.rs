//! Structured logging configuration.
//!
//! Two output modes:
//! - Development: pretty-printed human-readable logs (default)
//! - Production: JSON-formatted logs for log aggregation
//!
//! Set `VISIONTAG_LOG_FORMAT=json` for production JSON logs.
//! `RUST_LOG` overrides the configured level when set.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log format mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty-printed human-readable logs (default).
    Pretty,
    /// JSON-formatted logs for production.
    Json,
}

impl LogFormat {
    /// Detect log format from the environment.
    pub fn from_env() -> Self {
        match std::env::var("VISIONTAG_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initialize the logging subsystem.
///
/// `level` is the fallback filter (e.g. `"info"`, `"debug"`) used when
/// `RUST_LOG` is unset.
pub fn init(level: &str) {
    init_with_format(level, LogFormat::from_env());
}

/// Initialize the logging subsystem with an explicit format.
pub fn init_with_format(level: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_span_events(FmtSpan::CLOSE)
                        .with_current_span(true)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .init();
        }
    }
}
