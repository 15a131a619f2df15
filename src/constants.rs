//! A set of constants used by the library.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The gateway version used by the library. The gateway URL is retrieved via
/// the REST API.
pub const GATEWAY_VERSION: u8 = 10;

/// The default gateway URL, used when a connection URL was never supplied.
pub const GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// The maximum size, in bytes, of an outgoing gateway payload.
pub const GATEWAY_PAYLOAD_LIMIT: usize = 4096;

/// The number of outgoing gateway messages allowed per [`GATEWAY_SEND_WINDOW`].
pub const GATEWAY_SEND_LIMIT: u32 = 120;

/// The length of the gateway send window.
pub const GATEWAY_SEND_WINDOW: Duration = Duration::from_secs(60);

/// The minimum spacing between two IDENTIFY payloads on the same connection.
pub const IDENTIFY_DELAY: Duration = Duration::from_secs(5);

/// The maximum value accepted for the `large_threshold` Identify field.
pub const LARGE_THRESHOLD: u8 = 250;

/// The [UserAgent] sent along with every request.
///
/// [UserAgent]: https://discord.com/developers/docs/reference#user-agent
pub const USER_AGENT: &str =
    concat!("DiscordBot (https://github.com/accord-rs/accord, ", env!("CARGO_PKG_VERSION"), ")");

enum_number! {
    /// An enum representing the [gateway opcodes].
    ///
    /// [gateway opcodes]: https://discord.com/developers/docs/topics/opcodes-and-status-codes#gateway-gateway-opcodes
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
    #[serde(from = "u8", into = "u8")]
    #[non_exhaustive]
    pub enum Opcode {
        /// An event was dispatched.
        Dispatch = 0,
        /// Fired periodically by the client to keep the connection alive.
        Heartbeat = 1,
        /// Starts a new session during the initial handshake.
        Identify = 2,
        /// Update the client's presence.
        PresenceUpdate = 3,
        /// Used to join/leave or move between voice channels.
        VoiceStateUpdate = 4,
        /// Resume a previous session that was disconnected.
        Resume = 6,
        /// You should attempt to reconnect and resume immediately.
        Reconnect = 7,
        /// Request information about offline guild members in a large guild.
        RequestGuildMembers = 8,
        /// The session has been invalidated.
        InvalidSession = 9,
        /// Sent immediately after connecting, contains the `heartbeat_interval` to use.
        Hello = 10,
        /// Sent in response to receiving a heartbeat to acknowledge that it has been received.
        HeartbeatAck = 11,
        /// Request information about soundboard sounds in a set of guilds.
        RequestSoundboardSounds = 31,
        _ => Unknown(u8),
    }
}

/// The close codes the gateway may close a connection with.
///
/// [Discord docs](https://discord.com/developers/docs/topics/opcodes-and-status-codes#gateway-gateway-close-event-codes).
pub mod close_codes {
    /// Discord isn't sure what went wrong.
    pub const UNKNOWN_ERROR: u16 = 4000;
    /// An invalid opcode was sent.
    pub const UNKNOWN_OPCODE: u16 = 4001;
    /// An invalid payload was sent.
    pub const DECODE_ERROR: u16 = 4002;
    /// A payload was sent prior to identifying.
    pub const NOT_AUTHENTICATED: u16 = 4003;
    /// The account token sent with the identify payload was incorrect.
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    /// More than one identify payload was sent.
    pub const ALREADY_AUTHENTICATED: u16 = 4005;
    /// An invalid sequence was sent for resuming.
    pub const INVALID_SEQUENCE: u16 = 4007;
    /// Payloads were sent too quickly.
    pub const RATE_LIMITED: u16 = 4008;
    /// The session timed out, and a new one must be started.
    pub const SESSION_TIMEOUT: u16 = 4009;
    /// An invalid shard was sent when identifying.
    pub const INVALID_SHARD: u16 = 4010;
    /// The session would have handled too many guilds.
    pub const SHARDING_REQUIRED: u16 = 4011;
    /// An invalid gateway API version was used.
    pub const INVALID_API_VERSION: u16 = 4012;
    /// An invalid gateway intents bitmask was sent.
    pub const INVALID_GATEWAY_INTENTS: u16 = 4013;
    /// A disallowed gateway intent was sent.
    pub const DISALLOWED_GATEWAY_INTENTS: u16 = 4014;
}
