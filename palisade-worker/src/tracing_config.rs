//! Log output configuration for the Palisade worker.
//!
//! # Configuration
//!
//! ```bash
//! # Filter directives (standard tracing-subscriber syntax)
//! export RUST_LOG=palisade_worker=debug,palisade_runtime=info
//!
//! # Output format: json (default) or text
//! export PALISADE_LOG_FORMAT=text
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str =
    "palisade_worker=info,palisade_runtime=info,palisade_storage=info,tower_http=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, for log aggregation
    Json,
    /// Human-readable lines for local runs
    Text,
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub format: LogFormat,
    /// Include the span list on each event (JSON only)
    pub span_list: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

impl TracingConfig {
    /// Environment variables:
    /// - `PALISADE_LOG_FORMAT`: `json` or `text` (default: json)
    /// - `PALISADE_LOG_SPANS`: include span lists in JSON output (default: true)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = match lookup("PALISADE_LOG_FORMAT")
            .map(|v| v.to_lowercase())
            .as_deref()
        {
            Some("text") | Some("pretty") => LogFormat::Text,
            Some("json") | None => LogFormat::Json,
            Some(other) => {
                eprintln!(
                    "Warning: PALISADE_LOG_FORMAT={} is not recognised, using json",
                    other
                );
                LogFormat::Json
            }
        };

        let span_list = lookup("PALISADE_LOG_SPANS")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(true);

        Self { format, span_list }
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(
    config: &TracingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(config.span_list),
            )
            .try_init()?,
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?,
    }

    tracing::info!(format = ?config.format, "Tracing initialized");
    Ok(())
}
