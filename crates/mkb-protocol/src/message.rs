//! Message types for the streaming protocol
//!
//! Every message in either direction is an [`Envelope`]: a `type`
//! discriminator plus a `body` whose shape depends on the discriminator.
//!
//! # Message Flow
//!
//! 1. Client opens the WebSocket with its credential in the `i` query parameter
//! 2. Client sends `connect` with a [`ChannelConnectRequest`] per subscription
//! 3. Server pushes `channel` envelopes whose body is a [`ChannelEvent`]
//! 4. Client sends `disconnect` with an [`IdBody`] to drop a subscription
//!
//! The note kinds (`s`, `sr`, `un`) and `readNotification` also carry an
//! [`IdBody`]; the server's replies to them are not routed by this crate.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::subscription::SubscriptionId;

/// Declares a closed enumeration together with its wire token table.
///
/// Tokens serialize verbatim and parse case-insensitively.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident ($label:literal) {
            $( $(#[$vmeta:meta])* $variant:ident => $token:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Wire token for this variant
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $token, )+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s))
                    .ok_or_else(|| ProtocolError::UnknownToken {
                        kind: $label,
                        token: s.to_string(),
                    })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let token = String::deserialize(deserializer)?;
                token.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

wire_enum! {
    /// Envelope discriminator
    pub enum MessageKind ("message kind") {
        /// Mark a notification as read
        ReadNotification => "readNotification",
        /// Subscribe to updates for a single note
        SubscribeNote => "s",
        /// Subscribe to a note and mark it read
        SubscribeNoteRead => "sr",
        /// Drop a note subscription
        UnsubscribeNote => "un",
        /// Open a channel subscription
        Connect => "connect",
        /// Close a channel subscription
        Disconnect => "disconnect",
        /// Event pushed on a connected channel
        Channel => "channel",
    }
}

wire_enum! {
    /// Kind of event pushed on a channel
    pub enum ChannelEventType ("channel event type") {
        DriveFileCreated => "driveFileCreated",
        UrlUploadFinished => "urlUploadFinished",
        Follow => "follow",
        Followed => "followed",
        ReceiveFollowRequest => "receiveFollowRequest",
        Unfollow => "unfollow",
        Notification => "notification",
        Renote => "renote",
        Reply => "reply",
        Mention => "mention",
        PageEvent => "pageEvent",
        UnreadAntenna => "unreadAntenna",
        UnreadChannel => "unreadChannel",
        UnreadMention => "unreadMention",
        UnreadMessagingMessage => "unreadMessagingMessage",
        UnreadNotification => "unreadNotification",
        UnreadSpecifiedNote => "unreadSpecifiedNote",
        ReadAllAnnouncements => "readAllAnnouncements",
        ReadAllAntennas => "readAllAntennas",
        ReadAllChannel => "readAllChannel",
        ReadAllMessagingMessages => "readAllMessagingMessages",
        ReadAllNotifications => "readAllNotifications",
        ReadAllUnreadMentions => "readAllUnreadMentions",
        ReadAllUnreadSpecifiedNotes => "readAllUnreadSpecifiedNotes",
        ReadAntenna => "readAntenna",
        RegistryUpdated => "registryUpdated",
        Signin => "signin",
        MyTokenRegenerated => "myTokenRegenerated",
        MeUpdated => "meUpdated",
        MessagingMessage => "messagingMessage",
    }
}

/// Top-level wire message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<B> {
    /// Discriminator deciding the body shape
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Message body
    pub body: B,
}

impl<B> Envelope<B> {
    /// Create a new envelope
    pub fn new(kind: MessageKind, body: B) -> Self {
        Self { kind, body }
    }
}

/// Body of a `connect` envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConnectRequest {
    /// Subscription id, echoed back on every event for this channel
    pub id: String,
    /// Channel name on the server (e.g. `main`)
    pub channel: String,
}

impl ChannelConnectRequest {
    /// Build a request for a locally allocated subscription
    pub fn new(id: SubscriptionId, channel: impl Into<String>) -> Self {
        Self {
            id: id.to_wire(),
            channel: channel.into(),
        }
    }
}

/// Body carrying only an id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdBody {
    pub id: String,
}

impl IdBody {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl From<SubscriptionId> for IdBody {
    fn from(id: SubscriptionId) -> Self {
        Self { id: id.to_wire() }
    }
}

/// Event pushed by the server on a connected channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    /// Subscription the event belongs to
    #[serde(with = "wire_id")]
    pub id: SubscriptionId,
    /// What happened
    #[serde(rename = "type")]
    pub event_type: ChannelEventType,
    /// Event-specific structured value, left undecoded
    #[serde(rename = "body")]
    pub payload: Value,
}

impl ChannelEvent {
    /// Create a new channel event
    pub fn new(id: SubscriptionId, event_type: ChannelEventType, payload: Value) -> Self {
        Self {
            id,
            event_type,
            payload,
        }
    }
}

/// Subscription ids travel as strings; numbers are tolerated on decode.
mod wire_id {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    use crate::subscription::SubscriptionId;

    pub fn serialize<S>(id: &SubscriptionId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&id.to_wire())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SubscriptionId, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) => s.parse().map_err(serde::de::Error::custom),
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(SubscriptionId::new)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid subscription id {n}"))),
            other => Err(serde::de::Error::custom(format!(
                "invalid subscription id {other}"
            ))),
        }
    }
}
