//! mkbridge: Notification-to-actuator bridge
//!
//! Subscribes to a channel on the notification server's streaming
//! connection and turns selected events into short actuator pulses.

pub mod actuator;
pub mod router;

pub use actuator::DryRunActuator;
pub use router::Router;
