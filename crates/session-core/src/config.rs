//! Live-session configuration.
//!
//! Configuration is loaded from environment variables. The upload token is
//! redacted in Debug output.

use common::config::{ObservabilityConfig, DEFAULT_LOG_LEVEL};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::reconnect::BackoffPolicy;

/// Default recording upload endpoint.
pub const DEFAULT_UPLOAD_URL: &str = "http://localhost:3000/api/upload/material";

/// Default directory for locally delivered recordings.
pub const DEFAULT_RECORDINGS_DIR: &str = "recordings";

/// Default location of the persisted media preferences.
pub const DEFAULT_PREFERENCES_PATH: &str = ".live-session/media-preferences.json";

/// Default wait-for-connected timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 10;

/// Default number of reconnection attempts before giving up.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Default first backoff delay in milliseconds.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1000;

/// Default backoff cap in milliseconds.
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 10_000;

/// Live-session configuration.
#[derive(Clone)]
pub struct Config {
    /// Relay WebSocket endpoint (`ws://` or `wss://`).
    pub relay_url: String,

    /// Recording upload endpoint.
    pub upload_url: String,

    /// Optional bearer token for the upload endpoint.
    pub upload_token: Option<SecretString>,

    /// Directory receiving recordings when upload is not possible.
    pub recordings_dir: PathBuf,

    /// File holding the durable audio/video preferences.
    pub preferences_path: PathBuf,

    /// Wait-for-connected timeout and reconnection backoff.
    pub backoff: BackoffPolicy,

    /// Logging setup.
    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("relay_url", &self.relay_url)
            .field("upload_url", &self.upload_url)
            .field(
                "upload_token",
                &self.upload_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("recordings_dir", &self.recordings_dir)
            .field("preferences_path", &self.preferences_path)
            .field("backoff", &self.backoff)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is invalid.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let relay_url = vars
            .get("LIVE_SESSION_RELAY_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("LIVE_SESSION_RELAY_URL".to_string()))?
            .clone();
        if !(relay_url.starts_with("ws://") || relay_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(format!(
                "LIVE_SESSION_RELAY_URL must use ws:// or wss://, got {relay_url}"
            )));
        }

        let upload_url = vars
            .get("LIVE_SESSION_UPLOAD_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_UPLOAD_URL.to_string());

        let upload_token = vars
            .get("LIVE_SESSION_UPLOAD_TOKEN")
            .filter(|token| !token.is_empty())
            .map(|token| SecretString::from(token.clone()));

        let recordings_dir = vars
            .get("LIVE_SESSION_RECORDINGS_DIR")
            .map_or_else(|| PathBuf::from(DEFAULT_RECORDINGS_DIR), PathBuf::from);

        let preferences_path = vars
            .get("LIVE_SESSION_PREFERENCES_PATH")
            .map_or_else(|| PathBuf::from(DEFAULT_PREFERENCES_PATH), PathBuf::from);

        let connect_timeout_seconds = parse_var(
            vars,
            "LIVE_SESSION_CONNECT_TIMEOUT_SECONDS",
            DEFAULT_CONNECT_TIMEOUT_SECONDS,
        )?;
        let max_attempts = parse_var(
            vars,
            "LIVE_SESSION_RECONNECT_MAX_ATTEMPTS",
            DEFAULT_RECONNECT_MAX_ATTEMPTS,
        )?;
        let base_delay_ms = parse_var(
            vars,
            "LIVE_SESSION_RECONNECT_BASE_DELAY_MS",
            DEFAULT_RECONNECT_BASE_DELAY_MS,
        )?;
        let max_delay_ms = parse_var(
            vars,
            "LIVE_SESSION_RECONNECT_MAX_DELAY_MS",
            DEFAULT_RECONNECT_MAX_DELAY_MS,
        )?;

        if connect_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "LIVE_SESSION_CONNECT_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "LIVE_SESSION_RECONNECT_MAX_ATTEMPTS must be greater than zero".to_string(),
            ));
        }
        if base_delay_ms > max_delay_ms {
            return Err(ConfigError::InvalidValue(format!(
                "reconnect base delay {base_delay_ms}ms exceeds max delay {max_delay_ms}ms"
            )));
        }

        let backoff = BackoffPolicy {
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            max_attempts,
            connect_timeout: Duration::from_secs(connect_timeout_seconds),
        };

        let log_level = vars
            .get("LIVE_SESSION_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let json_logs = parse_var(vars, "LIVE_SESSION_LOG_JSON", false)?;

        Ok(Config {
            relay_url,
            upload_url,
            upload_token,
            recordings_dir,
            preferences_path,
            backoff,
            observability: ObservabilityConfig {
                log_level,
                json_logs,
            },
        })
    }
}

fn parse_var<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
    }
}
