//! mkb-protocol: Wire protocol for the mkbridge streaming connection
//!
//! This crate defines the JSON envelope format exchanged with the
//! notification server, the channel event types it pushes, and the
//! reassembly of fragmented transport frames into whole messages.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod subscription;

pub use codec::{decode_channel_event, decode_envelope, encode_envelope};
pub use error::ProtocolError;
pub use frame::{FrameReassembler, DEFAULT_MAX_MESSAGE_SIZE};
pub use message::{
    ChannelConnectRequest, ChannelEvent, ChannelEventType, Envelope, IdBody, MessageKind,
};
pub use subscription::SubscriptionId;
