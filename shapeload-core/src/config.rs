//! Loader configuration.
//!
//! Every deadline is optional. An absent deadline keeps the indefinite wait
//! of an unconfigured loader.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::deadline::Deadline;
use crate::error::{ConfigError, LoaderResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// Upper bound on one load, from the gate wait to the cache write.
    #[serde(default)]
    pub load_timeout_ms: Option<u64>,
    /// Upper bound on shape sync that continues after a non-blocking load.
    #[serde(default)]
    pub background_sync_timeout_ms: Option<u64>,
    /// Upper bound on a single live query run.
    #[serde(default)]
    pub live_query_timeout_ms: Option<u64>,
    /// File extension of the tab-scoped database.
    #[serde(default = "default_database_extension")]
    pub database_extension: String,
}

fn default_database_extension() -> String {
    "db".to_string()
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: None,
            background_sync_timeout_ms: None,
            live_query_timeout_ms: None,
            database_extension: default_database_extension(),
        }
    }
}

impl LoaderConfig {
    /// Load from the path given by `--config` or `SHAPELOAD_CONFIG`.
    pub fn load() -> LoaderResult<Self> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> LoaderResult<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> LoaderResult<Self> {
        let config: LoaderConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout_ms = Some(duration_to_ms(timeout));
        self
    }

    pub fn with_background_sync_timeout(mut self, timeout: Duration) -> Self {
        self.background_sync_timeout_ms = Some(duration_to_ms(timeout));
        self
    }

    pub fn with_live_query_timeout(mut self, timeout: Duration) -> Self {
        self.live_query_timeout_ms = Some(duration_to_ms(timeout));
        self
    }

    pub fn with_database_extension(mut self, extension: impl Into<String>) -> Self {
        self.database_extension = extension.into();
        self
    }

    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout_ms.map(Duration::from_millis)
    }

    pub fn background_sync_timeout(&self) -> Option<Duration> {
        self.background_sync_timeout_ms.map(Duration::from_millis)
    }

    pub fn live_query_timeout(&self) -> Option<Duration> {
        self.live_query_timeout_ms.map(Duration::from_millis)
    }

    /// Fresh deadline for one load.
    pub fn load_deadline(&self) -> Deadline {
        Deadline::from_timeout(self.load_timeout())
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - configured timeouts are positive
    /// - database_extension is non-empty and has no path separators
    pub fn validate(&self) -> LoaderResult<()> {
        let timeouts = [
            ("load_timeout_ms", self.load_timeout_ms),
            ("background_sync_timeout_ms", self.background_sync_timeout_ms),
            ("live_query_timeout_ms", self.live_query_timeout_ms),
        ];
        for (field, value) in timeouts {
            if value == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "timeout must be positive; omit it to wait indefinitely".to_string(),
                }
                .into());
            }
        }

        let extension = self.database_extension.trim();
        if extension.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "database_extension".to_string(),
                value: self.database_extension.clone(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        if extension.contains(['/', '\\']) {
            return Err(ConfigError::InvalidValue {
                field: "database_extension".to_string(),
                value: self.database_extension.clone(),
                reason: "must not contain path separators".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("SHAPELOAD_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
