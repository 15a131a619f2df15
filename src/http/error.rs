use std::error::Error as StdError;
use std::fmt;

use reqwest::Error as ReqwestError;
use serde::de::Deserializer;
use serde::Deserialize;

use super::transport::TransportResponse;
use super::LightMethod;
use crate::internal::prelude::*;
use crate::ErrorKind;

/// The error body Discord attaches to unsuccessful responses.
///
/// [Discord docs](https://discord.com/developers/docs/reference#error-messages).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct DiscordJsonError {
    /// The error code.
    pub code: isize,
    /// The error message.
    pub message: String,
    /// The per-field errors, flattened out of the nested `errors` object.
    #[serde(default, deserialize_with = "deserialize_errors")]
    pub errors: Vec<DiscordJsonSingleError>,
}

/// One entry of the per-field error list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscordJsonSingleError {
    /// The error code.
    pub code: String,
    /// The error message.
    pub message: String,
    /// The dotted path of the field the error belongs to.
    pub path: String,
}

/// What could be salvaged out of a response with a status in the 400s or
/// 500s: the status itself, the request that provoked it, the response
/// headers, and the parsed error body.
#[derive(Clone, Debug)]
pub struct ErrorResponse {
    pub status_code: u16,
    pub url: String,
    pub method: LightMethod,
    pub headers: Vec<(String, String)>,
    pub error: DiscordJsonError,
}

impl ErrorResponse {
    pub(super) fn new(method: LightMethod, url: String, response: &TransportResponse) -> Self {
        let error = serde_json::from_slice(&response.body).unwrap_or_else(|_| DiscordJsonError {
            code: -1,
            message: String::from_utf8_lossy(&response.body).into_owned(),
            errors: Vec::new(),
        });

        Self {
            status_code: response.status,
            url,
            method,
            headers: response.headers.clone(),
            error,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// A response with a status code in the 400s or 500s. A 429 lands here
    /// only once its retry budget is exhausted.
    UnsuccessfulRequest(ErrorResponse),
    /// The invalid-request window tripped; the request was refused locally
    /// without touching the network.
    TooManyInvalidRequests,
    /// The caller supplied a header the client reserves for itself.
    ReservedHeader(String),
    /// A header name or value that cannot go on the wire.
    InvalidHeader(String),
    /// A request with a non-JSON body needs an explicit `Content-Type`.
    MissingContentType,
    /// The request URL is not a Discord API URL.
    InvalidUrl(String),
    /// The configured user agent does not follow the documented
    /// `DiscordBot ($url, $version)` shape.
    InvalidUserAgent,
    /// An error from the `reqwest` crate.
    Request(ReqwestError),
}

impl HttpError {
    /// Returns the [`ErrorKind`] this error falls under.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsuccessfulRequest(response) => match response.status_code {
                400 => ErrorKind::BadRequest,
                401 => ErrorKind::Unauthorized,
                403 => ErrorKind::Forbidden,
                404 => ErrorKind::NotFound,
                429 => ErrorKind::RateLimited,
                500..=599 => ErrorKind::ServerError,
                _ => ErrorKind::Http,
            },
            Self::TooManyInvalidRequests => ErrorKind::InvalidState,
            Self::ReservedHeader(_)
            | Self::InvalidHeader(_)
            | Self::MissingContentType
            | Self::InvalidUrl(_)
            | Self::InvalidUserAgent => ErrorKind::InvalidParam,
            Self::Request(e) => {
                if e.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Network
                }
            },
        }
    }

    /// Returns true when the error is a 429 whose retry budget ran out.
    #[must_use]
    pub fn is_ratelimited(&self) -> bool {
        matches!(self, Self::UnsuccessfulRequest(ErrorResponse { status_code: 429, .. }))
    }
}

impl From<ReqwestError> for HttpError {
    fn from(e: ReqwestError) -> Self {
        Self::Request(e)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsuccessfulRequest(e) => {
                write!(f, "{} {}: {} (error code {})", e.status_code, e.url, e.error.message, e.error.code)
            },
            Self::TooManyInvalidRequests => {
                f.write_str("Refusing to send: too many invalid requests in the current window")
            },
            Self::ReservedHeader(name) => write!(f, "Header is set by the client: {name}"),
            Self::InvalidHeader(name) => write!(f, "Invalid header: {name}"),
            Self::MissingContentType => f.write_str("Non-JSON body without a Content-Type header"),
            Self::InvalidUrl(url) => write!(f, "Not a Discord API URL: {url}"),
            Self::InvalidUserAgent => {
                f.write_str("User agent must look like `DiscordBot ($url, $version)`")
            },
            Self::Request(inner) => fmt::Display::fmt(&inner, f),
        }
    }
}

impl StdError for HttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Request(inner) => Some(inner),
            _ => None,
        }
    }
}

fn deserialize_errors<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> StdResult<Vec<DiscordJsonSingleError>, D::Error> {
    let map: Value = Value::deserialize(deserializer)?;
    let mut errors = Vec::new();

    if let Value::Object(map) = map {
        loop_errors(&map, &mut errors, &[]);
    }

    Ok(errors)
}

fn loop_errors(map: &JsonMap, errors: &mut Vec<DiscordJsonSingleError>, path: &[String]) {
    for (key, value) in map {
        if key == "_errors" {
            let Some(array) = value.as_array() else {
                continue;
            };

            for error in array {
                let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
                let message = error.get("message").and_then(Value::as_str).unwrap_or_default();

                errors.push(DiscordJsonSingleError {
                    code: code.to_owned(),
                    message: message.to_owned(),
                    path: path.join("."),
                });
            }
        } else if let Value::Object(inner) = value {
            let mut path = path.to_vec();
            path.push(key.clone());

            loop_errors(inner, errors, &path);
        }
    }
}
