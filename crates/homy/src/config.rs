//! Configuration file parsing and structures.
//!
//! homy uses TOML for configuration. Every section is optional; an empty file gives a
//! working in-memory setup that probes with the default timeout.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `reqwest = "warn"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

fn default_timeout_ms() -> u64 {
    7_000
}

/// Discovery pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Bound on each probe request, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Fetch the device once and run every stage on that response
    #[serde(default)]
    pub single_fetch: bool,

    /// Pause after each successful stage so a UI can show progress
    #[serde(default)]
    pub settle_delay_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            single_fetch: false,
            settle_delay_ms: 0,
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Device/entity store configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    /// JSON file to persist devices in. In-memory only when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8565
}

/// HTTP API configuration
#[derive(Debug, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "discovery.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.discovery.timeout(), Duration::from_secs(7));
        assert!(!config.discovery.single_fetch);
        assert!(config.discovery.settle_delay().is_zero());
        assert!(config.store.path.is_none());
        assert_eq!(config.api.port, 8565);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [logging]
            level = "debug"

            [logging.overrides]
            reqwest = "warn"

            [discovery]
            timeout_ms = 2500
            single_fetch = true
            settle_delay_ms = 2000

            [store]
            path = "/var/lib/homy/devices.json"

            [api]
            listen = "0.0.0.0"
            port = 9000
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.overrides["reqwest"], LogLevel::Warn);
        assert_eq!(config.discovery.timeout(), Duration::from_millis(2500));
        assert!(config.discovery.single_fetch);
        assert_eq!(config.discovery.settle_delay(), Duration::from_secs(2));
        assert_eq!(
            config.store.path.as_deref(),
            Some(Path::new("/var/lib/homy/devices.json"))
        );
        assert_eq!(config.api.listen, "0.0.0.0");
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        assert!(toml::from_str::<Config>("[telemetry]\nenabled = true").is_err());
    }

    #[test]
    fn test_from_file_rejects_zero_timeout() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("homy.toml");
        std::fs::write(&path, "[discovery]\ntimeout_ms = 0\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/homy.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }
}
