//! Bridge configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use mkb_protocol::ChannelEventType;

use super::serde_utils::duration_millis;
use super::stream::StreamConfig;
use crate::error::ConfigError;
use crate::types::Intensity;

/// Event types that trigger the actuators unless configured otherwise
pub const DEFAULT_EVENT_TYPES: &[ChannelEventType] = &[
    ChannelEventType::ReceiveFollowRequest,
    ChannelEventType::Followed,
    ChannelEventType::Mention,
    ChannelEventType::Notification,
];

/// Configuration for the notification-to-actuator bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// API token for the notification server.
    ///
    /// Usually passed on the command line instead of stored here.
    pub token: Option<String>,

    /// Channel to subscribe to
    pub channel: String,

    /// Actuator server host
    pub actuator_host: String,

    /// Actuator server port
    pub actuator_port: u16,

    /// Event types that trigger the actuators
    pub event_types: Vec<ChannelEventType>,

    /// Actuator strength, 0–100
    pub intensity: u32,

    /// How long the actuators run per event
    #[serde(with = "duration_millis")]
    pub duration: Duration,

    /// Virtual devices exposed by the dry-run actuator
    pub devices: Vec<String>,

    /// Streaming connection settings
    pub stream: StreamConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            token: None,
            channel: "main".to_string(),
            actuator_host: "localhost".to_string(),
            actuator_port: 12345,
            event_types: DEFAULT_EVENT_TYPES.to_vec(),
            intensity: 33,
            duration: Duration::from_millis(300),
            devices: vec!["dry-run device".to_string()],
            stream: StreamConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Actuator server address (host:port)
    pub fn actuator_address(&self) -> String {
        format!("{}:{}", self.actuator_host, self.actuator_port)
    }

    /// Configured intensity as an actuator value
    pub fn actuator_intensity(&self) -> Intensity {
        Intensity::from_percent(self.intensity)
    }

    /// Check the configuration for values the bridge cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stream.validate()?;
        if self.intensity > 100 {
            return Err(ConfigError::Invalid(format!(
                "intensity must be between 0 and 100, got {}",
                self.intensity
            )));
        }
        if self.channel.trim().is_empty() {
            return Err(ConfigError::MissingField("channel".to_string()));
        }
        if self.token.as_deref().map_or(true, |t| t.is_empty()) {
            return Err(ConfigError::MissingField("token".to_string()));
        }
        Ok(())
    }
}
