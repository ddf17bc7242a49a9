//! Actuator-control collaborator

use async_trait::async_trait;

use crate::error::ActuatorError;
use crate::types::{ActuatorKind, DeviceHandle, Intensity};

/// Client for a device-control server
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Open the session with the device-control server
    async fn connect(&self) -> Result<(), ActuatorError>;

    /// Devices currently known to the server
    async fn enumerate_devices(&self) -> Result<Vec<DeviceHandle>, ActuatorError>;

    /// Drive one output of a device
    async fn set_actuator(
        &self,
        device: &DeviceHandle,
        kind: ActuatorKind,
        intensity: Intensity,
    ) -> Result<(), ActuatorError>;

    /// Stop every device
    async fn stop_all(&self) -> Result<(), ActuatorError>;
}
