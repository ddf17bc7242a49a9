//! Event router
//!
//! Turns channel events into actuator pulses: every device vibrates at the
//! configured intensity for the configured duration, then everything stops.
//! Events whose type is not in the allow-list are ignored.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mkb_core::config::BridgeConfig;
use mkb_core::traits::Actuator;
use mkb_core::{ActuatorKind, DeviceHandle, Intensity};
use mkb_protocol::{ChannelEvent, ChannelEventType};

/// Routes channel events to actuator pulses
pub struct Router {
    actuator: Arc<dyn Actuator>,
    devices: Arc<[DeviceHandle]>,
    event_types: HashSet<ChannelEventType>,
    intensity: Intensity,
    duration: Duration,
    /// Cancels pending stops at process shutdown
    shutdown: CancellationToken,
}

impl Router {
    /// Create a router using the bridge configuration's pulse settings
    pub fn from_config(
        actuator: Arc<dyn Actuator>,
        devices: Vec<DeviceHandle>,
        config: &BridgeConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            actuator,
            devices: devices.into(),
            event_types: config.event_types.iter().copied().collect(),
            intensity: config.actuator_intensity(),
            duration: config.duration,
            shutdown,
        }
    }

    /// Whether events of this type trigger a pulse
    pub fn accepts(&self, event_type: ChannelEventType) -> bool {
        self.event_types.contains(&event_type)
    }

    /// React to one event.
    ///
    /// Returns the handle of the spawned pulse, or `None` if the event type
    /// is filtered out. Must be called within a tokio runtime.
    pub fn handle(&self, event: &ChannelEvent) -> Option<JoinHandle<()>> {
        if !self.accepts(event.event_type) {
            tracing::debug!(event_type = %event.event_type, "Ignoring event");
            return None;
        }

        let event_id = event.payload.get("id").and_then(|id| id.as_str()).unwrap_or("");
        tracing::info!(
            event_type = %event.event_type,
            event_id,
            "Event received; pulsing actuators"
        );

        let pulse = Pulse {
            actuator: Arc::clone(&self.actuator),
            devices: Arc::clone(&self.devices),
            intensity: self.intensity,
            duration: self.duration,
            shutdown: self.shutdown.clone(),
        };
        Some(tokio::spawn(pulse.run()))
    }

    /// Callback suitable for `StreamSession::subscribe`
    pub fn callback(self: &Arc<Self>) -> impl Fn(ChannelEvent) + Send + Sync + 'static {
        let router = Arc::clone(self);
        move |event| {
            router.handle(&event);
        }
    }
}

/// One start-wait-stop cycle
struct Pulse {
    actuator: Arc<dyn Actuator>,
    devices: Arc<[DeviceHandle]>,
    intensity: Intensity,
    duration: Duration,
    shutdown: CancellationToken,
}

impl Pulse {
    async fn run(self) {
        for device in self.devices.iter() {
            if let Err(e) = self
                .actuator
                .set_actuator(device, ActuatorKind::Vibrate, self.intensity)
                .await
            {
                tracing::warn!(%device, error = %e, "Failed to start actuator");
            }
        }

        tokio::select! {
            _ = self.shutdown.cancelled() => {
                tracing::debug!("Shutting down; skipping scheduled stop");
                return;
            }
            _ = tokio::time::sleep(self.duration) => {}
        }

        if let Err(e) = self.actuator.stop_all().await {
            tracing::warn!(error = %e, "Failed to stop actuators");
        }
    }
}
