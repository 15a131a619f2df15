use std::error::Error as StdError;
use std::fmt;

use crate::ErrorKind;

/// An error that occurred while attempting to deal with the gateway.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// There was an error building a URL.
    BuildingUrl,
    /// Failure to decompress a compressed payload.
    Compression,
    /// The connection was not established within the configured deadline.
    ConnectTimeout,
    /// Disallowed gateway intents were provided.
    DisallowedGatewayIntents,
    /// A heartbeat went unacknowledged for too long; the connection is
    /// considered zombied.
    HeartbeatTimeout,
    /// The gateway rejected the API version this library speaks.
    InvalidApiVersion,
    /// The gateway rejected the account token.
    InvalidAuthentication,
    /// Invalid gateway intents were provided.
    InvalidGatewayIntents,
    /// A configuration or argument value failed validation.
    InvalidParameter(&'static str),
    /// The gateway rejected the shard data sent when identifying.
    InvalidShardData,
    /// When a session id was expected (for resuming), but was not present.
    NoSessionId,
    /// The operation requires a Ready session.
    NotReady,
    /// The shard would have handled too many guilds.
    OverloadedShard,
    /// An outgoing payload exceeded the gateway's size cap.
    PayloadTooLarge,
}

impl Error {
    /// Returns the [`ErrorKind`] this error falls under.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BuildingUrl
            | Self::DisallowedGatewayIntents
            | Self::InvalidGatewayIntents
            | Self::InvalidParameter(_)
            | Self::PayloadTooLarge => ErrorKind::InvalidParam,
            Self::Compression => ErrorKind::InvalidFormat,
            Self::ConnectTimeout | Self::HeartbeatTimeout => ErrorKind::Timeout,
            Self::InvalidAuthentication => ErrorKind::Unauthorized,
            Self::InvalidApiVersion
            | Self::InvalidShardData
            | Self::NoSessionId
            | Self::NotReady
            | Self::OverloadedShard => ErrorKind::InvalidState,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildingUrl => f.write_str("Error building url"),
            Self::Compression => f.write_str("Error decompressing payload"),
            Self::ConnectTimeout => f.write_str("Connection was not established in time"),
            Self::DisallowedGatewayIntents => {
                f.write_str("Disallowed gateway intents were provided")
            },
            Self::HeartbeatTimeout => f.write_str("Heartbeat was not acknowledged in time"),
            Self::InvalidApiVersion => f.write_str("The gateway rejected the API version"),
            Self::InvalidAuthentication => f.write_str("Sent invalid authentication"),
            Self::InvalidGatewayIntents => f.write_str("Invalid gateway intents were provided"),
            Self::InvalidParameter(name) => write!(f, "Invalid value for `{name}`"),
            Self::InvalidShardData => f.write_str("Sent invalid shard data"),
            Self::NoSessionId => f.write_str("No Session Id present when required"),
            Self::NotReady => f.write_str("The session is not in the Ready stage"),
            Self::OverloadedShard => f.write_str("Shard has too many guilds"),
            Self::PayloadTooLarge => f.write_str("Outgoing payload exceeds the gateway cap"),
        }
    }
}

impl StdError for Error {}
