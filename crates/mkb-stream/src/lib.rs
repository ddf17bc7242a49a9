//! mkb-stream: Streaming channel multiplexer
//!
//! A [`StreamSession`] owns one long-lived streaming connection to the
//! notification server, multiplexes channel subscriptions over it, and runs
//! a receive loop that reassembles, decodes, and dispatches inbound events
//! to per-subscription callbacks.

pub mod receive;
pub mod session;
mod state;
pub mod table;
pub mod transport;

pub use session::StreamSession;
pub use table::{Callback, SubscriptionTable};
pub use transport::memory::{memory_transport, MemoryConnector, MemoryPeer};
pub use transport::websocket::WebSocketConnector;
