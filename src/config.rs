//! Application configuration.
//!
//! Loaded once at startup from TOML; every field has a default so an empty
//! file (or no file) is a valid configuration. The loaded value is shared
//! read-only with every request as its configuration snapshot.
//!
//! ```toml
//! mode = "production"
//!
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [log]
//! level = "restline=debug,info"
//! format = "json"
//!
//! [cors]
//! origins = ["https://app.example.com"]
//! credentials = true
//!
//! [app]
//! greeting = "hello"
//! ```

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cors::CorsConfig;

/// Environment variable that overrides [`Config::mode`].
pub const MODE_ENV: &str = "RESTLINE_MODE";

/// Operating mode. Production suppresses 5xx bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub server: ServerConfig,
    pub log: LogConfig,
    pub body: BodyConfig,
    pub cors: Option<CorsConfig>,
    /// Free-form application settings, visible to handlers.
    pub app: toml::Table,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_owned() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// An `EnvFilter` directive string; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_owned(), format: LogFormat::Pretty }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Parse request bodies by content type before the chain runs.
    pub parse: bool,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self { parse: true }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("server.bind `{0}` is not a socket address")]
    BindAddress(String),

    #[error("log.level `{0}` is not a valid filter")]
    LogLevel(String),

    #[error("cors: {0}")]
    Cors(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl Config {
    /// Loads, applies the environment override, and validates.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.apply_env();
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Applies `RESTLINE_MODE` when it is set to a known mode.
    ///
    /// [`App::new`](crate::App::new) calls this, so the override holds for a
    /// config built in code as well as one loaded from a file.
    pub fn apply_env(&mut self) {
        self.override_mode(std::env::var(MODE_ENV).ok().as_deref());
    }

    fn override_mode(&mut self, raw: Option<&str>) {
        let Some(raw) = raw else { return };
        match Mode::parse(raw) {
            Some(mode) => self.mode = mode,
            None => warn!(value = %raw, "ignoring unknown {MODE_ENV}"),
        }
    }

    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.server.bind.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::BindAddress(self.server.bind.clone()));
        }
        if tracing_subscriber::EnvFilter::try_new(&self.log.level).is_err() {
            errors.push(ValidationError::LogLevel(self.log.level.clone()));
        }
        if let Some(cors) = &self.cors {
            if let Err(e) = cors.validate() {
                errors.push(ValidationError::Cors(e.to_string()));
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    pub fn is_production(&self) -> bool {
        self.mode == Mode::Production
    }

    /// Looks up a key in the `[app]` table.
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.app.get(key)
    }
}
