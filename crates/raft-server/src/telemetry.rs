//! # telemetry
//!
//! why: one place to install the process-wide tracing subscriber
//! relations: format chosen by config.rs's ServerConfig::init_logging, overridable through LOG_FORMAT
//! what: LogFormat, init_logging

use serde::{Deserialize, Serialize};
use tracing_subscriber::prelude::*;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// multi-line, human readable
    #[default]
    Pretty,
    /// one line per event
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

impl LogFormat {
    /// read from the LOG_FORMAT environment variable; unset or unknown values give `None`
    pub fn from_env() -> Option<Self> {
        std::env::var("LOG_FORMAT").ok()?.parse().ok()
    }
}

/// install the global subscriber; levels come from `RUST_LOG` (default `info`)
///
/// fails if a global subscriber is already set.
pub fn init_logging(
    format: LogFormat,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .try_init()?;
        }
    }

    Ok(())
}
