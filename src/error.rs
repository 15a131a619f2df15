use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;

use reqwest::Error as ReqwestError;
use serde_json::Error as JsonError;
use tokio_tungstenite::tungstenite::Error as TungsteniteError;

use crate::gateway::GatewayError;
use crate::http::HttpError;
use crate::internal::prelude::*;

/// The common result type between most library functions.
///
/// The library exposes functions which, for a result type, exposes only one
/// type, rather than the usual 2 (`Result<T, Error>`). This is because all
/// functions that return a result return this crate's [`Error`], so this is
/// implied, and a "simpler" result is used.
pub type Result<T> = StdResult<T, Error>;

/// A common error enum returned by most of the library's functionality within a
/// custom [`Result`].
///
/// The most common error types, the [`GatewayError`] and [`HttpError`] enums,
/// are both wrapped around this in the form of the [`Self::Gateway`] and
/// [`Self::Http`] variants.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An error while decoding a payload.
    Decode(&'static str, Value),
    /// An `std::io` error.
    Io(IoError),
    /// An error from the `serde_json` crate.
    Json(JsonError),
    /// An error from the `gateway` module.
    Gateway(GatewayError),
    /// An error from the `http` module.
    Http(HttpError),
    /// An error from the `tungstenite` crate.
    Tungstenite(Box<TungsteniteError>),
}

/// The coarse category of an [`Error`].
///
/// Every error the library produces maps onto exactly one kind, which stays
/// stable across versions even as the underlying variants gain detail. Match
/// on this when the reaction to a failure depends on its class rather than on
/// its exact cause.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A caller-supplied value failed validation.
    InvalidParam,
    /// Data was structurally valid but semantically malformed.
    InvalidFormat,
    /// The operation is not valid in the current state.
    InvalidState,
    /// The requested resource does not exist.
    NotFound,
    /// A transport-level failure (DNS, TCP, TLS).
    Network,
    /// A deadline elapsed.
    Timeout,
    /// A WebSocket protocol failure.
    WebSocket,
    /// Data could not be parsed.
    Parse,
    /// The server rejected the credentials.
    Unauthorized,
    /// The server understood the credentials but denied access.
    Forbidden,
    /// The server rejected the request as malformed.
    BadRequest,
    /// Rate limited, and the retry budget is exhausted.
    RateLimited,
    /// The server failed (5xx).
    ServerError,
    /// Any other unsuccessful HTTP status.
    Http,
    /// The operation should be retried; reserved for unreachable fallthrough.
    TryAgain,
    /// Everything else.
    Unknown,
}

impl Error {
    /// Returns the [`ErrorKind`] this error falls under.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode(..) => ErrorKind::Parse,
            Self::Io(_) => ErrorKind::Network,
            Self::Json(_) => ErrorKind::Parse,
            Self::Gateway(e) => e.kind(),
            Self::Http(e) => e.kind(),
            Self::Tungstenite(_) => ErrorKind::WebSocket,
        }
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Self::Io(e)
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Self {
        Self::Json(e)
    }
}

impl From<GatewayError> for Error {
    fn from(e: GatewayError) -> Self {
        Self::Gateway(e)
    }
}

impl From<HttpError> for Error {
    fn from(e: HttpError) -> Self {
        Self::Http(e)
    }
}

impl From<ReqwestError> for Error {
    fn from(e: ReqwestError) -> Self {
        Self::Http(HttpError::Request(e))
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Self {
        Self::Tungstenite(Box::new(e))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(msg, _) => f.write_str(msg),
            Self::Io(inner) => fmt::Display::fmt(&inner, f),
            Self::Json(inner) => fmt::Display::fmt(&inner, f),
            Self::Gateway(inner) => fmt::Display::fmt(&inner, f),
            Self::Http(inner) => fmt::Display::fmt(&inner, f),
            Self::Tungstenite(inner) => fmt::Display::fmt(&inner, f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(inner) => Some(inner),
            Self::Json(inner) => Some(inner),
            Self::Gateway(inner) => Some(inner),
            Self::Http(inner) => Some(inner),
            Self::Tungstenite(inner) => Some(inner),
            Self::Decode(..) => None,
        }
    }
}
