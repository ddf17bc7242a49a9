//! Stream session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use mkb_protocol::DEFAULT_MAX_MESSAGE_SIZE;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Configuration for a streaming connection to the notification server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Server host, optionally with a `ws://` or `wss://` scheme.
    ///
    /// A bare host name is reached over `wss://`.
    pub host: String,

    /// Handshake timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How long `close` waits for the receive loop to exit
    #[serde(with = "duration_secs")]
    pub close_timeout: Duration,

    /// Largest reassembled message accepted; larger ones are dropped
    pub max_message_size: usize,

    /// Log every message sent and received at TRACE level
    pub trace_wire: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            connect_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            trace_wire: false,
        }
    }
}

impl StreamConfig {
    /// Create a configuration for the given host with defaults elsewhere
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Base URL of the streaming endpoint, without credentials
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ConfigError::MissingField("stream.host".to_string()));
        }

        let url = if host.contains("://") {
            Url::parse(host)?
        } else {
            Url::parse(&format!("wss://{}", host))?
        };

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::Invalid(format!(
                "unsupported stream scheme '{}'",
                other
            ))),
        }
    }

    /// Full endpoint URL carrying the credential in the `i` query parameter
    pub fn endpoint(&self, credential: &str) -> Result<Url, ConfigError> {
        let mut url = self.base_url()?;
        url.query_pairs_mut().clear().append_pair("i", credential);
        Ok(url)
    }

    /// Check the configuration for values the session cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "stream.max_message_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
