//! Dry-run actuator
//!
//! Stands in for the device-control server: devices come from
//! configuration and every command is logged instead of sent.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use mkb_core::error::ActuatorError;
use mkb_core::traits::Actuator;
use mkb_core::{ActuatorKind, DeviceHandle, Intensity};

/// Actuator that logs commands against a fixed set of virtual devices
pub struct DryRunActuator {
    /// Address a real client would connect to
    address: String,
    devices: Vec<DeviceHandle>,
    connected: AtomicBool,
    /// Current output per device index
    levels: Mutex<HashMap<u32, (ActuatorKind, Intensity)>>,
}

impl DryRunActuator {
    /// Create an actuator exposing one device per name, indexed from 0
    pub fn new<S: AsRef<str>>(address: impl Into<String>, device_names: &[S]) -> Self {
        let devices = device_names
            .iter()
            .zip(0u32..)
            .map(|(name, index)| DeviceHandle::new(index, name.as_ref()))
            .collect();

        Self {
            address: address.into(),
            devices,
            connected: AtomicBool::new(false),
            levels: Mutex::new(HashMap::new()),
        }
    }

    /// Current output of a device, if it is running
    #[cfg(test)]
    fn level(&self, device: &DeviceHandle) -> Option<(ActuatorKind, Intensity)> {
        self.levels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&device.index)
            .copied()
    }

    /// Whether any device is running
    #[cfg(test)]
    fn is_active(&self) -> bool {
        !self
            .levels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    fn ensure_connected(&self) -> Result<(), ActuatorError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ActuatorError::NotConnected)
        }
    }
}

#[async_trait]
impl Actuator for DryRunActuator {
    async fn connect(&self) -> Result<(), ActuatorError> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            tracing::info!(
                address = %self.address,
                "Dry-run actuator ready (no commands are sent)"
            );
        }
        Ok(())
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceHandle>, ActuatorError> {
        self.ensure_connected()?;
        for device in &self.devices {
            tracing::info!(%device, "Device available");
        }
        Ok(self.devices.clone())
    }

    async fn set_actuator(
        &self,
        device: &DeviceHandle,
        kind: ActuatorKind,
        intensity: Intensity,
    ) -> Result<(), ActuatorError> {
        self.ensure_connected()?;
        if !self.devices.contains(device) {
            return Err(ActuatorError::DeviceNotFound(device.to_string()));
        }

        tracing::info!(%device, %kind, %intensity, "Set actuator");
        let mut levels = self.levels.lock().unwrap_or_else(PoisonError::into_inner);
        if intensity == Intensity::ZERO {
            levels.remove(&device.index);
        } else {
            levels.insert(device.index, (kind, intensity));
        }
        Ok(())
    }

    async fn stop_all(&self) -> Result<(), ActuatorError> {
        self.ensure_connected()?;
        let mut levels = self.levels.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::info!(running = levels.len(), "Stop all devices");
        levels.clear();
        Ok(())
    }
}
