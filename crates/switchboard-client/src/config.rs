//! Session configuration.
//!
//! Configuration for a Switchboard session, loaded from TOML (or JSON for
//! files ending in `.json`), including:
//! - Server URL and client identification
//! - Static auth token
//! - Reconnection backoff
//! - Heartbeat, connection and request timeouts
//! - Outbound queue and latency window sizes

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::transport::ReconnectConfig;

fn default_client_id() -> String {
    "switchboard".to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

const fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

const fn default_max_missed_heartbeats() -> u32 {
    3
}

const fn default_connect_timeout_ms() -> u64 {
    10_000
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}

const fn default_queue_capacity() -> usize {
    1000
}

const fn default_latency_window() -> usize {
    100
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Reconnection backoff settings, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Delay before the first reconnection attempt.
    pub base_interval_ms: u64,
    /// Exponential growth factor per attempt.
    pub decay: f64,
    /// Upper bound on the delay before jitter.
    pub max_interval_ms: u64,
    /// Maximum number of attempts (None = unbounded).
    pub max_attempts: Option<u32>,
    /// Random jitter as a fraction of the delay, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_interval_ms: 1000,
            decay: 1.5,
            max_interval_ms: 30_000,
            max_attempts: None,
            jitter: 0.3,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectConfig {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            base_interval: Duration::from_millis(settings.base_interval_ms),
            decay: settings.decay,
            max_interval: Duration::from_millis(settings.max_interval_ms),
            max_attempts: settings.max_attempts,
            jitter: settings.jitter,
        }
    }
}

/// Main session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Server WebSocket URL.
    pub url: String,
    /// Client identifier sent as the `clientId` query parameter.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Client version sent as the `version` query parameter.
    #[serde(default = "default_client_version")]
    pub client_version: String,
    /// Static auth token, used until a token source yields a fresher one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Interval between heartbeat pings.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Unanswered pings tolerated before the connection is considered dead.
    #[serde(default = "default_max_missed_heartbeats")]
    pub max_missed_heartbeats: u32,
    /// Time allowed for the socket to open.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Default timeout for correlated requests.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Maximum number of queued outbound messages.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Number of latency samples kept for the rolling average.
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
    /// Reconnection backoff.
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

impl SessionConfig {
    /// Create a configuration for the given URL with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: default_client_id(),
            client_version: default_client_version(),
            token: None,
            reconnect: ReconnectSettings::default(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_missed_heartbeats: default_max_missed_heartbeats(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            latency_window: default_latency_window(),
        }
    }

    /// Set the static auth token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Load configuration from a file.
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        if is_json(path) {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ClientError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ClientError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, ClientError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| ClientError::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to a file, creating parent directories.
    ///
    /// The format follows the extension, as in [`SessionConfig::from_file`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ClientError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = if is_json(path) {
            serde_json::to_string_pretty(self).map_err(|e| e.to_string())
        } else {
            toml::to_string_pretty(self).map_err(|e| e.to_string())
        }
        .map_err(|e| ClientError::Config(format!("failed to encode config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.url.is_empty() {
            return Err(ClientError::Config("url cannot be empty".to_string()));
        }

        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(ClientError::Config(
                "url must start with ws:// or wss://".to_string(),
            ));
        }

        url::Url::parse(&self.url)?;

        if self.client_id.is_empty() {
            return Err(ClientError::Config("client_id cannot be empty".to_string()));
        }

        if self.queue_capacity == 0 {
            return Err(ClientError::Config(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.latency_window == 0 {
            return Err(ClientError::Config(
                "latency_window must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat_interval_ms == 0 {
            return Err(ClientError::Config(
                "heartbeat_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout_ms == 0 {
            return Err(ClientError::Config(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.base_interval_ms == 0 {
            return Err(ClientError::Config(
                "reconnect.base_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.reconnect.max_interval_ms < self.reconnect.base_interval_ms {
            return Err(ClientError::Config(
                "reconnect.max_interval_ms must be at least base_interval_ms".to_string(),
            ));
        }

        if !(self.reconnect.decay >= 1.0) {
            return Err(ClientError::Config(
                "reconnect.decay must be at least 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ClientError::Config(
                "reconnect.jitter must be between 0 and 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Backoff configuration for the transport.
    #[must_use]
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::from(&self.reconnect)
    }

    /// Heartbeat ping interval.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Time allowed for the socket to open.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Default request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
