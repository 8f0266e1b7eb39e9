//! Log output for the voice engine.
//!
//! The engine logs route changes at `debug`, caller mistakes at `warn` and
//! per-frame decisions at `trace`, so `info` is quiet enough for production
//! while `RUST_LOG=horizon_voice=trace` shows every forwarded frame.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global subscriber for a standalone voice process.
///
/// `RUST_LOG` wins over `config.level` when set. `json_format` forces JSON
/// output even if the config file asks for plain text.
///
/// A server that embeds the engine usually installs its own subscriber
/// first; in that case this returns an error and the existing subscriber
/// keeps receiving the engine's events.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    info!("🔧 Voice logging initialized with level: {}", log_level);
    Ok(())
}
