use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ErrorCode;
use crate::gateway::IssueQuery;
use crate::reconnect::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, RetryState};
use crate::session::SessionConfig;

pub const ENV_WS_URL: &str = "DISPATCH_WS_URL";
pub const ENV_API_URL: &str = "DISPATCH_API_URL";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub endpoints: EndpointConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Preferred output mode: `pretty`, `text`, or `json`.
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            api_url: default_api_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Bound on TCP connect plus the websocket handshake.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid {field} '{url}': {reason}")]
    InvalidEndpoint {
        field: &'static str,
        url: String,
        reason: &'static str,
    },
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } | Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::InvalidEndpoint { .. } => ErrorCode::InvalidEndpoint,
        }
    }
}

impl DispatchConfig {
    /// Overlay `DISPATCH_WS_URL` / `DISPATCH_API_URL` from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_WS_URL).filter(|v| !v.trim().is_empty()) {
            self.endpoints.ws_url = url.trim().to_string();
        }
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.endpoints.api_url = url.trim().to_string();
        }
    }

    /// Check that both endpoints use a scheme the client can speak.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEndpoint`] naming the first bad URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_scheme("ws_url", &self.endpoints.ws_url, &["ws://", "wss://"])?;
        check_scheme("api_url", &self.endpoints.api_url, &["http://", "https://"])
    }

    #[must_use]
    pub const fn retry(&self) -> RetryState {
        RetryState::new(
            self.reconnect.max_attempts,
            Duration::from_millis(self.reconnect.delay_ms),
        )
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect.connect_timeout_ms)
    }

    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    #[must_use]
    pub fn session(&self, query: IssueQuery) -> SessionConfig {
        SessionConfig {
            ws_url: self.endpoints.ws_url.clone(),
            query,
            retry: self.retry(),
        }
    }
}

fn check_scheme(
    field: &'static str,
    url: &str,
    schemes: &[&str],
) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidEndpoint {
        field,
        url: url.to_string(),
        reason,
    };
    let Some(rest) = schemes.iter().find_map(|scheme| url.strip_prefix(scheme)) else {
        return Err(invalid("unsupported scheme"));
    };
    if rest.is_empty() || rest.starts_with('/') {
        return Err(invalid("missing host"));
    }
    Ok(())
}

/// `$XDG_CONFIG_HOME/dispatch/config.toml`, or the platform equivalent.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dispatch").join("config.toml"))
}

/// Load a config file; a missing file yields defaults.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file exists but cannot be read or parsed.
pub fn load_config_from(path: &Path) -> Result<DispatchConfig, ConfigError> {
    if !path.exists() {
        return Ok(DispatchConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str::<DispatchConfig>(&content).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Load the user config file, then overlay environment endpoints.
///
/// # Errors
///
/// Returns [`ConfigError`] if the config file is unreadable or malformed.
pub fn load_config() -> Result<DispatchConfig, ConfigError> {
    let mut config = match user_config_path() {
        Some(path) => load_config_from(&path)?,
        None => DispatchConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

fn default_ws_url() -> String {
    "ws://localhost:8002/ws".to_string()
}

fn default_api_url() -> String {
    "http://localhost:8002".to_string()
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

#[allow(clippy::cast_possible_truncation)]
const fn default_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

const fn default_connect_timeout_ms() -> u64 {
    10_000
}

const fn default_timeout_secs() -> u64 {
    10
}
