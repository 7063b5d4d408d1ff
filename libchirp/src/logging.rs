//! Logging setup for the chirp CLI
//!
//! Diagnostics always go to stderr so stdout stays reserved for command
//! output (and `--json` stays parseable). Format and level come from
//! `CHIRP_LOG_FORMAT` (`text`, `json` or `pretty`) and `CHIRP_LOG_LEVEL`; an
//! explicit `RUST_LOG` filter beats both. The `--verbose` flag bumps the
//! default level to debug.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "CHIRP_LOG_FORMAT";
pub const LOG_LEVEL_ENV: &str = "CHIRP_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain text, one event per line, no colors.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
    /// Pretty-printed with colors (for development).
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// Install the global subscriber. Call once, at startup.
///
/// # Panics
///
/// Panics if a subscriber is already installed.
pub fn init(format: LogFormat, level: &str, verbose: bool) {
    let default_level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .init();
        }
    }
}

/// Initialize from `CHIRP_LOG_FORMAT` / `CHIRP_LOG_LEVEL`, defaulting to
/// text at info.
pub fn init_from_env(verbose: bool) {
    let format = std::env::var(LOG_FORMAT_ENV)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    init(format, &level, verbose);
}
