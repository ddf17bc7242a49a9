//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a stream session.
///
/// A session moves strictly forward: `Idle → Connecting → Open → Closing →
/// Closed`. A failed handshake jumps from `Connecting` straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Created, never connected
    Idle,
    /// Handshake in progress
    Connecting,
    /// Handshake succeeded, receive loop running
    Open,
    /// Shutdown in progress
    Closing,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A device exposed by the actuator server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Server-assigned device index
    pub index: u32,
    /// Human-readable device name
    pub name: String,
}

impl DeviceHandle {
    /// Create a new device handle
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.index)
    }
}

/// Output an actuator command drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    Vibrate,
    Rotate,
    Oscillate,
    Constrict,
    Inflate,
    Position,
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vibrate => "vibrate",
            Self::Rotate => "rotate",
            Self::Oscillate => "oscillate",
            Self::Constrict => "constrict",
            Self::Inflate => "inflate",
            Self::Position => "position",
        };
        f.write_str(name)
    }
}

/// Actuator strength in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Intensity(f64);

impl Intensity {
    /// Off
    pub const ZERO: Intensity = Intensity(0.0);

    /// Create an intensity, clamping into range (NaN becomes zero)
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Create an intensity from a 0–100 percentage
    pub fn from_percent(percent: u32) -> Self {
        Self::new(f64::from(percent) / 100.0)
    }

    /// Raw value
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}%", self.0 * 100.0)
    }
}
