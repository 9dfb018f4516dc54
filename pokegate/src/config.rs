use gateway::config::{Config as GatewayConfig, ValidationError};
use serde::Deserialize;
use std::fs::File;

#[derive(Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set
    #[serde(default = "default_log_level")]
    pub level: String,
    pub sentry_dsn: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            sentry_dsn: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub metrics: Option<MetricsConfig>,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Loads the YAML file at `path`, applies `<NAME>_SERVICE_URL` overrides
    /// from the process environment and validates the result.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        Self::from_file_with_env(path, std::env::vars())
    }

    pub fn from_file_with_env<I>(path: &std::path::Path, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let file = File::open(path)?;
        let mut config: Config = serde_yaml::from_reader(file)?;

        config.gateway.apply_env_overrides(vars)?;
        config.gateway.validate()?;

        Ok(config)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}
