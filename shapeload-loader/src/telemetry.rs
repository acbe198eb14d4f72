//! Default tracing subscriber.
//!
//! The library only emits `tracing` events. Applications that have no
//! subscriber of their own can install this one at startup.

use std::fmt;
use std::str::FromStr;

use shapeload_core::{ConfigError, LoaderResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "shapeload_loader=info,warn";

/// Output format of the default subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue {
                field: "SHAPELOAD_LOG_FORMAT".to_string(),
                value: other.to_string(),
                reason: "expected json or pretty".to_string(),
            }),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::default(),
        }
    }
}

impl TelemetryConfig {
    /// Read `SHAPELOAD_LOG` (filter directives) and `SHAPELOAD_LOG_FORMAT`
    /// (`json` or `pretty`).
    pub fn from_env() -> LoaderResult<Self> {
        let filter = std::env::var("SHAPELOAD_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string());
        let format = match std::env::var("SHAPELOAD_LOG_FORMAT") {
            Ok(value) => value.parse()?,
            Err(_) => LogFormat::default(),
        };
        Ok(Self { filter, format })
    }
}

/// Install a global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> LoaderResult<()> {
    let env_filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
        field: "SHAPELOAD_LOG".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    installed.map_err(|e| ConfigError::InvalidValue {
        field: "subscriber".to_string(),
        value: config.format.to_string(),
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::info!(format = %config.format, filter = %config.filter, "Telemetry initialized");
    Ok(())
}
