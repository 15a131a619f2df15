//! Contains the necessary plumbing for maintaining a connection with Discord.
//!
//! The primary building block is the [`Shard`]: a single WebSocket connection
//! to Discord's gateway, together with the session state needed to keep it
//! alive: the heartbeat schedule, the resume bookkeeping, the outgoing
//! message queue and its send budget.
//!
//! A shard is single-threaded and cooperative: the application constructs it
//! from a [`GatewayConfig`], calls [`Shard::connect`], and then drives it by
//! calling [`Shard::process`] in a loop. Dispatched events and stage changes
//! are delivered through the [`EventSink`] the application supplies.

mod error;
mod inflater;
mod shard;
mod ws;

use std::fmt;

pub use self::error::Error as GatewayError;
pub use self::shard::{GatewayConfig, Shard};
pub use self::ws::WsClient;
use crate::model::gateway::{ActivityType, OnlineStatus};
use crate::model::id::UserId;

/// The connection stage of a [`Shard`].
///
/// This can be useful for knowing which shards are currently "down"/"up".
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum ConnectionStage {
    /// No socket is open and no reconnect is scheduled.
    Disconnected,
    /// The WebSocket handshake is in flight.
    Connecting,
    /// The socket is established, awaiting the gateway's Hello.
    Connected,
    /// An IDENTIFY has been queued; awaiting READY.
    Identifying,
    /// A RESUME has been queued; awaiting RESUMED.
    Resuming,
    /// The session is live and events are flowing.
    Ready,
    /// The connection was lost and a reconnect attempt is scheduled.
    Reconnecting,
}

impl ConnectionStage {
    /// Whether the stage is a form of connecting.
    ///
    /// This will return `true` on:
    /// - [`Connecting`][`ConnectionStage::Connecting`]
    /// - [`Connected`][`ConnectionStage::Connected`]
    /// - [`Identifying`][`ConnectionStage::Identifying`]
    /// - [`Resuming`][`ConnectionStage::Resuming`]
    ///
    /// All other variants will return `false`.
    #[must_use]
    pub fn is_connecting(self) -> bool {
        use self::ConnectionStage::{Connected, Connecting, Identifying, Resuming};
        matches!(self, Connecting | Connected | Identifying | Resuming)
    }
}

impl fmt::Display for ConnectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// The capability object a [`Shard`] delivers into.
///
/// Domain deserialization is not this crate's business, so events arrive as
/// the dispatch name paired with the raw JSON of the payload; a layer above
/// decides what to decode and how.
pub trait EventSink: Send {
    /// Called for every dispatch that survives sequence dedup, with the event
    /// name (e.g. `MESSAGE_CREATE`) and the JSON text of its `d` payload.
    fn on_event(&self, name: &str, data: &str);

    /// Called whenever the connection stage changes.
    fn on_state(&self, stage: ConnectionStage) {
        let _ = stage;
    }
}

/// Presence data of the current user.
#[derive(Clone, Debug, Default)]
pub struct PresenceData {
    /// The current activity, if present
    pub activity: Option<ActivityData>,
    /// The current online status
    pub status: OnlineStatus,
}

/// Activity data of the current user.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ActivityData {
    /// The name of the activity
    pub name: String,
    /// The type of the activity
    #[serde(rename = "type")]
    pub kind: ActivityType,
    /// The state of the activity, if the type is [`ActivityType::Custom`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl ActivityData {
    /// Creates an activity that appears as `Playing <name>`.
    #[must_use]
    pub fn playing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ActivityType::Playing,
            state: None,
        }
    }

    /// Creates an activity that appears as `Listening to <name>`.
    #[must_use]
    pub fn listening(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ActivityType::Listening,
            state: None,
        }
    }

    /// Creates an activity that appears as `Watching <name>`.
    #[must_use]
    pub fn watching(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ActivityType::Watching,
            state: None,
        }
    }

    /// Creates an activity that appears as `Competing in <name>`.
    #[must_use]
    pub fn competing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ActivityType::Competing,
            state: None,
        }
    }

    /// Creates an activity that appears as `<state>`.
    #[must_use]
    pub fn custom(state: impl Into<String>) -> Self {
        Self {
            // discord seems to require a name for custom activities
            // even though it's not displayed
            name: "~".to_owned(),
            kind: ActivityType::Custom,
            state: Some(state.into()),
        }
    }
}

/// [Discord docs](https://discord.com/developers/docs/topics/gateway-events#request-guild-members).
#[derive(Clone, Debug)]
pub enum ChunkGuildFilter {
    /// Returns all members of the guilds specified. Requires GUILD_MEMBERS intent.
    None,
    /// A common username prefix filter for the members returned.
    ///
    /// Will return a maximum of 100 members.
    Query(String),
    /// A set of exact user IDs to query for.
    ///
    /// Will return a maximum of 100 members.
    UserIds(Vec<UserId>),
}
