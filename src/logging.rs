//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
/// Logs go to stderr so stdout stays clean for reports.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(&config.level, std::env::var("RUST_LOG").ok())?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Subscriber used while the configuration itself is being resolved, so
/// load and override warnings are not lost. Honors `RUST_LOG`, otherwise the
/// default level.
pub fn bootstrap() -> impl tracing::Subscriber + Send + Sync {
    let level = LoggingConfig::default().level;
    let filter = build_filter(&level, std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish()
}

fn build_filter(level: &str, env_directive: Option<String>) -> Result<EnvFilter> {
    if let Some(directive) = env_directive.filter(|d| !d.trim().is_empty()) {
        if let Ok(filter) = EnvFilter::try_new(&directive) {
            return Ok(filter);
        }
    }
    EnvFilter::try_new(level).with_context(|| format!("invalid log level '{level}'"))
}
