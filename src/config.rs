//! Configuration module for dispomail.

use serde::Deserialize;
use std::path::Path;

use crate::{DispomailError, Result};

/// SMTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Hostname announced in the greeting banner.
    #[serde(default = "default_smtp_hostname")]
    pub hostname: String,
    /// Maximum number of concurrent SMTP sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle timeout in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Maximum accepted message size in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_smtp_port() -> u16 {
    2525
}

fn default_smtp_hostname() -> String {
    "localhost".to_string()
}

fn default_max_connections() -> usize {
    100
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_max_message_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_smtp_port(),
            hostname: default_smtp_hostname(),
            max_connections: default_max_connections(),
            idle_timeout_secs: default_idle_timeout(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

/// Which database engine backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    /// Embedded single-file engine.
    #[default]
    Sqlite,
    /// Client/server engine.
    Postgres,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: DatabaseBackend,
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// PostgreSQL connection URL.
    #[serde(default)]
    pub url: String,
    /// Pool size.
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    "data/dispomail.db".to_string()
}

fn default_db_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            path: default_db_path(),
            url: String::new(),
            max_connections: default_db_max_connections(),
        }
    }
}

/// Push (WebSocket) server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// Whether the push server is enabled.
    #[serde(default = "default_push_enabled")]
    pub enabled: bool,
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number for the push server.
    #[serde(default = "default_push_port")]
    pub port: u16,
    /// Interval between sweeps of closed connections, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Messages queued per connection; further messages to a connection
    /// that is not reading are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_push_enabled() -> bool {
    true
}

fn default_push_port() -> u16 {
    8080
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    crate::push::DEFAULT_QUEUE_CAPACITY
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: default_push_enabled(),
            host: default_host(),
            port: default_push_port(),
            sweep_interval_secs: default_sweep_interval(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Authentication configuration.
///
/// Login itself happens elsewhere; this only holds what is needed to verify
/// the tokens it issues.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Whether addresses can be owned and connections must authenticate.
    #[serde(default)]
    pub enabled: bool,
    /// JWT secret key (must be set if enabled).
    #[serde(default)]
    pub jwt_secret: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/dispomail.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// SMTP listener configuration.
    #[serde(default)]
    pub smtp: SmtpConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Push server configuration.
    #[serde(default)]
    pub push: PushConfig,
    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(DispomailError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| DispomailError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `DISPOMAIL_JWT_SECRET`: Override the JWT secret key
    /// - `DISPOMAIL_DATABASE_URL`: Override the PostgreSQL URL
    pub fn apply_env_overrides(&mut self) {
        if let Ok(jwt_secret) = std::env::var("DISPOMAIL_JWT_SECRET") {
            if !jwt_secret.is_empty() {
                self.auth.jwt_secret = jwt_secret;
            }
        }
        if let Ok(url) = std::env::var("DISPOMAIL_DATABASE_URL") {
            if !url.is_empty() {
                self.database.url = url;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - Auth is enabled but JWT secret is not set
    /// - The PostgreSQL backend is selected without a URL
    pub fn validate(&self) -> Result<()> {
        if self.auth.enabled && self.auth.jwt_secret.is_empty() {
            return Err(DispomailError::Config(
                "auth is enabled but jwt_secret is not set. \
                 Set it in config.toml or via DISPOMAIL_JWT_SECRET environment variable."
                    .to_string(),
            ));
        }
        if self.database.backend == DatabaseBackend::Postgres && self.database.url.is_empty() {
            return Err(DispomailError::Config(
                "postgres backend selected but database.url is not set".to_string(),
            ));
        }
        Ok(())
    }
}
