//! Transport implementations
//!
//! - [`websocket`]: production transport over tokio-tungstenite
//! - [`memory`]: in-process transport driven by a test peer

pub mod memory;
pub mod websocket;
