//! Core trait definitions

mod actuator;
mod transport;

pub use actuator::Actuator;
pub use transport::{Connector, FrameSink, FrameSource, TransportFrame};
