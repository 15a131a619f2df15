//! The HTTP module which provides functions for performing requests to
//! endpoints in Discord's API.
//!
//! An important function of the REST API is ratelimiting. Requests to
//! endpoints are ratelimited to prevent spam, and once ratelimited Discord
//! will stop performing requests. The library implements protection to
//! pre-emptively ratelimit, to ensure that no wasted requests are made.
//!
//! Requests are made through the [`Http`] client, which injects the
//! `Authorization` and `User-Agent` headers, consults the rate limit gates,
//! and retries when the server answers with a 429. The actual wire transfer
//! is delegated to a [`Transport`] driver; the default one is backed by
//! `reqwest`, and tests substitute their own.

mod client;
mod error;
pub mod ratelimiting;
mod request;
mod routing;
pub mod transport;

pub use reqwest::Method;

pub use self::client::{Http, HttpBuilder, Response};
pub use self::error::{DiscordJsonError, DiscordJsonSingleError, ErrorResponse, HttpError};
pub use self::ratelimiting::{Ratelimit, RatelimitInfo, Ratelimiter};
pub use self::request::Request;
pub use self::routing::RouteKey;
pub use self::transport::{Transport, TransportRequest, TransportResponse};

/// An method used for ratelimiting special routes.
///
/// This is needed because [`reqwest`]'s `Method` enum does not derive `Copy`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LightMethod {
    /// Indicates that a route is for the `DELETE` method only.
    Delete,
    /// Indicates that a route is for the `GET` method only.
    Get,
    /// Indicates that a route is for the `HEAD` method only.
    Head,
    /// Indicates that a route is for the `OPTIONS` method only.
    Options,
    /// Indicates that a route is for the `PATCH` method only.
    Patch,
    /// Indicates that a route is for the `POST` method only.
    Post,
    /// Indicates that a route is for the `PUT` method only.
    Put,
}

impl LightMethod {
    #[must_use]
    pub fn reqwest_method(self) -> Method {
        match self {
            Self::Delete => Method::DELETE,
            Self::Get => Method::GET,
            Self::Head => Method::HEAD,
            Self::Options => Method::OPTIONS,
            Self::Patch => Method::PATCH,
            Self::Post => Method::POST,
            Self::Put => Method::PUT,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

/// How the `Authorization` header is derived from the configured token.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AuthType {
    /// `Authorization: Bot <token>`, for bot accounts.
    #[default]
    Bot,
    /// `Authorization: Bearer <token>`, for OAuth2 access tokens.
    Bearer,
}
