//! Configuration for the Switchboard client

use crate::auth::Credentials;
use crate::backoff::BackoffConfig;
use crate::error::{Result, SwitchboardError};
use std::time::Duration;

/// Configuration for connecting to a Switchboard endpoint
#[derive(Debug, Clone)]
pub struct SwitchboardConfig {
    /// Server URL (e.g., "wss://pubsub.example.com/ws")
    pub url: String,

    /// Project keys, `<P>-<identity>-<secret>`
    pub keys: Vec<String>,

    /// Timeout for opening the transport
    pub connect_timeout: Duration,

    /// Timeout for each correlated request
    pub request_timeout: Duration,

    /// Whether to automatically reconnect on disconnect
    pub auto_reconnect: bool,

    /// Initial delay before reconnecting
    pub reconnect_delay: Duration,

    /// Maximum delay between reconnection attempts
    pub max_reconnect_delay: Duration,

    /// Growth factor applied to the delay after each failed attempt
    pub backoff_factor: f64,

    /// Fraction of each delay that is randomized (0.0 - 1.0)
    pub jitter: f64,

    /// Give up after this many consecutive failed attempts (unlimited if `None`)
    pub max_reconnect_attempts: Option<u32>,

    /// Session to resume on the first handshake
    pub session_uuid: Option<String>,
}

impl SwitchboardConfig {
    /// Create a new configuration with the given URL and keys
    pub fn new<S: Into<String>>(url: impl Into<String>, keys: impl IntoIterator<Item = S>) -> Self {
        Self {
            url: url.into(),
            keys: keys.into_iter().map(Into::into).collect(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.5,
            max_reconnect_attempts: None,
            session_uuid: None,
        }
    }

    /// Build a configuration from `SWITCHBOARD_*` environment variables
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("SWITCHBOARD_URL")
            .map_err(|_| SwitchboardError::Config("SWITCHBOARD_URL not set".to_string()))?;
        let keys = std::env::var("SWITCHBOARD_KEYS")
            .map_err(|_| SwitchboardError::Config("SWITCHBOARD_KEYS not set".to_string()))?;

        let mut config = Self::new(
            url,
            keys.split(',').map(str::trim).filter(|k| !k.is_empty()),
        );

        if let Some(ms) = env_parse::<u64>("SWITCHBOARD_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("SWITCHBOARD_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(enabled) = env_parse::<bool>("SWITCHBOARD_AUTO_RECONNECT")? {
            config.auto_reconnect = enabled;
        }
        if let Ok(uuid) = std::env::var("SWITCHBOARD_SESSION_UUID") {
            if !uuid.is_empty() {
                config.session_uuid = Some(uuid);
            }
        }

        Ok(config)
    }

    /// Disable automatic reconnection
    pub fn no_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    /// Set the reconnection delay range
    pub fn reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }

    /// Set the backoff growth factor and jitter fraction
    pub fn backoff(mut self, factor: f64, jitter: f64) -> Self {
        self.backoff_factor = factor;
        self.jitter = jitter;
        self
    }

    /// Stop reconnecting after `attempts` consecutive failures
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Resume this session on the first handshake
    pub fn resume_session(mut self, uuid: impl Into<String>) -> Self {
        self.session_uuid = Some(uuid.into());
        self
    }

    pub(crate) fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.reconnect_delay,
            max_delay: self.max_reconnect_delay,
            factor: self.backoff_factor,
            jitter: self.jitter,
        }
    }

    /// Check the configuration and parse the keys
    pub fn validate(&self) -> Result<Credentials> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(SwitchboardError::Config(format!(
                "url must use ws:// or wss://, got '{}'",
                self.url
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(SwitchboardError::Config("connect timeout must be > 0".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(SwitchboardError::Config("request timeout must be > 0".to_string()));
        }
        self.backoff_config()
            .validate()
            .map_err(SwitchboardError::Config)?;

        Credentials::from_keys(&self.keys)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SwitchboardError::Config(format!("invalid value for {}: '{}'", name, value))),
        Err(_) => Ok(None),
    }
}
