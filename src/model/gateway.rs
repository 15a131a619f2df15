//! Models pertaining to the gateway.

use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize, Serializer};

use crate::internal::prelude::*;

/// The shard cell of an Identify payload: this shard's index and the total
/// shard count, serialized as the `[id, total]` array the gateway expects.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ShardInfo {
    pub id: u16,
    pub total: u16,
}

impl ShardInfo {
    #[must_use]
    pub const fn new(id: u16, total: u16) -> Self {
        Self {
            id,
            total,
        }
    }
}

impl Serialize for ShardInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> StdResult<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(2)?;
        tup.serialize_element(&self.id)?;
        tup.serialize_element(&self.total)?;
        tup.end()
    }
}

/// The online status of the current user.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[non_exhaustive]
pub enum OnlineStatus {
    #[serde(rename = "dnd")]
    DoNotDisturb,
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "invisible")]
    Invisible,
    #[serde(rename = "offline")]
    Offline,
    #[default]
    #[serde(rename = "online")]
    Online,
}

impl OnlineStatus {
    #[must_use]
    pub fn name(&self) -> &str {
        match *self {
            OnlineStatus::DoNotDisturb => "dnd",
            OnlineStatus::Idle => "idle",
            OnlineStatus::Invisible => "invisible",
            OnlineStatus::Offline => "offline",
            OnlineStatus::Online => "online",
        }
    }
}

enum_number! {
    /// The type of an activity in a presence.
    ///
    /// [Discord docs](https://discord.com/developers/docs/topics/gateway-events#activity-object-activity-types).
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
    #[serde(from = "u8", into = "u8")]
    #[non_exhaustive]
    pub enum ActivityType {
        /// An indicator that the user is playing a game.
        Playing = 0,
        /// An indicator that the user is streaming to a service.
        Streaming = 1,
        /// An indicator that the user is listening to something.
        Listening = 2,
        /// An indicator that the user is watching something.
        Watching = 3,
        /// An indicator that the user has set a custom status.
        Custom = 4,
        /// An indicator that the user is competing somewhere.
        Competing = 5,
        _ => Unknown(u8),
    }
}

bitflags! {
    /// [Gateway intents] declare which event groups a session wants delivered.
    ///
    /// [Gateway intents]: https://discord.com/developers/docs/topics/gateway#gateway-intents
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct GatewayIntents: u64 {
        /// Guilds-related events, such as guild and channel create/update/delete.
        const GUILDS = 1;
        /// Guild member events. Privileged.
        const GUILD_MEMBERS = 1 << 1;
        /// Guild moderation events, such as bans and audit log entries.
        const GUILD_MODERATION = 1 << 2;
        /// Guild emoji and sticker update events.
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        /// Guild integration events.
        const GUILD_INTEGRATIONS = 1 << 4;
        /// Guild webhook update events.
        const GUILD_WEBHOOKS = 1 << 5;
        /// Guild invite events.
        const GUILD_INVITES = 1 << 6;
        /// Guild voice state events.
        const GUILD_VOICE_STATES = 1 << 7;
        /// Guild presence events. Privileged.
        const GUILD_PRESENCES = 1 << 8;
        /// Guild message events.
        const GUILD_MESSAGES = 1 << 9;
        /// Guild message reaction events.
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        /// Guild typing start events.
        const GUILD_MESSAGE_TYPING = 1 << 11;
        /// Direct message events.
        const DIRECT_MESSAGES = 1 << 12;
        /// Direct message reaction events.
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        /// Direct message typing start events.
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        /// Message content in message events. Privileged.
        const MESSAGE_CONTENT = 1 << 15;
        /// Guild scheduled event events.
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        /// Auto moderation rule configuration events.
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        /// Auto moderation execution events.
        const AUTO_MODERATION_EXECUTION = 1 << 21;
    }
}

impl GatewayIntents {
    /// The intents that do not require a verified bot or prior approval.
    #[must_use]
    pub const fn non_privileged() -> GatewayIntents {
        Self::all()
            .difference(Self::GUILD_MEMBERS)
            .difference(Self::GUILD_PRESENCES)
            .difference(Self::MESSAGE_CONTENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_info_serializes_as_array() {
        let out = serde_json::to_string(&ShardInfo::new(1, 3)).expect("serialize");
        assert_eq!(out, "[1,3]");
    }

    #[test]
    fn intents_round_trip() {
        let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES;
        let out = serde_json::to_string(&intents).expect("serialize");
        assert_eq!(out, "513");

        let back: GatewayIntents = serde_json::from_str(&out).expect("deserialize");
        assert_eq!(back, intents);
    }

    #[test]
    fn non_privileged_excludes_privileged_bits() {
        let intents = GatewayIntents::non_privileged();
        assert!(!intents.contains(GatewayIntents::GUILD_MEMBERS));
        assert!(!intents.contains(GatewayIntents::GUILD_PRESENCES));
        assert!(!intents.contains(GatewayIntents::MESSAGE_CONTENT));
        assert!(intents.contains(GatewayIntents::GUILDS));
    }
}
