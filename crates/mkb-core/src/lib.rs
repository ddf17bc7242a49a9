//! mkb-core: Core abstractions and configuration for mkbridge
//!
//! This crate provides the error taxonomy, configuration structures, and
//! the transport and actuator traits shared by the stream session and the
//! bridge binary.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::MkbError;
pub use types::{ActuatorKind, DeviceHandle, Intensity, SessionState};
