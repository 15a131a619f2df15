use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use super::ratelimiting::{retry_after_seconds, RatelimitBody, RatelimitInfo, Ratelimiter};
use super::request::Request;
use super::routing::RouteKey;
use super::transport::{HttpsTransport, Transport, TransportRequest};
use super::{AuthType, ErrorResponse, HttpError};
use crate::constants;
use crate::internal::prelude::*;
use crate::json;
use crate::secret_string::SecretString;

/// A builder for the underlying [`Http`] client that performs requests to
/// Discord's HTTP API.
///
/// ## Example
///
/// Create an instance of [`Http`] with a custom user agent and a tighter
/// retry budget:
///
/// ```rust
/// # use accord::http::HttpBuilder;
/// # fn run() {
/// let http = HttpBuilder::new("token")
///     .user_agent("DiscordBot (https://example.com/mybot, 1.0.0)")
///     .max_retries(1)
///     .build()
///     .expect("valid configuration");
/// # }
/// ```
#[must_use]
pub struct HttpBuilder {
    token: String,
    auth_type: AuthType,
    user_agent: Option<String>,
    timeout: Duration,
    max_retries: u8,
    global_limit: u32,
    global_window: Duration,
    invalid_limit: u32,
    invalid_window: Duration,
    transport: Option<Arc<dyn Transport>>,
}

impl HttpBuilder {
    /// Construct a new builder for a bot token. The token may optionally
    /// start with `Bot ` or `Bearer `, which is stripped before the auth type
    /// is applied.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            auth_type: AuthType::Bot,
            user_agent: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            global_limit: 50,
            global_window: Duration::from_millis(1000),
            invalid_limit: 10_000,
            invalid_window: Duration::from_millis(600_000),
            transport: None,
        }
    }

    /// Uses `Bearer` authorization instead of `Bot`.
    pub fn auth_type(mut self, auth_type: AuthType) -> Self {
        self.auth_type = auth_type;
        self
    }

    /// Overrides the default user agent. The value must follow the shape
    /// Discord documents: `DiscordBot ($url, $version)`.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// The default per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The number of attempts a 429'd request may consume before it is given
    /// up on. Clamped to at least 1.
    pub fn max_retries(mut self, max_retries: u8) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Reconfigures the global window, which defaults to Discord's documented
    /// 50 requests per second.
    pub fn global_ratelimit(mut self, limit: u32, window: Duration) -> Self {
        self.global_limit = limit;
        self.global_window = window;
        self
    }

    /// Reconfigures the invalid-request window, which defaults to Discord's
    /// documented 10,000 per 10 minutes.
    pub fn invalid_request_limit(mut self, limit: u32, window: Duration) -> Self {
        self.invalid_limit = limit;
        self.invalid_window = window;
        self
    }

    /// Substitutes the wire driver; used by tests and proxies.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the [`Http`] client.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidUserAgent`] when a configured user agent
    /// does not follow the documented shape.
    pub fn build(self) -> Result<Http> {
        if let Some(user_agent) = &self.user_agent {
            if !valid_user_agent(user_agent) {
                return Err(Error::Http(HttpError::InvalidUserAgent));
            }
        }

        let token = format_token(&self.token, self.auth_type);

        Ok(Http {
            transport: self.transport.unwrap_or_else(|| Arc::new(HttpsTransport::new())),
            ratelimiter: Ratelimiter::new(
                self.global_limit,
                self.global_window,
                self.invalid_limit,
                self.invalid_window,
            ),
            token: SecretString::new(token.into()),
            user_agent: self.user_agent.unwrap_or_else(|| constants::USER_AGENT.to_owned()),
            timeout: self.timeout,
            max_retries: self.max_retries.max(1),
        })
    }
}

/// The client for interacting with the REST API.
///
/// The client is internally synchronized and is normally shared behind an
/// [`Arc`]; any number of tasks may call [`Self::execute`] concurrently. A
/// call blocks, sleeping where a rate limit gate demands it and retrying on
/// 429, until the request either succeeds or definitively fails.
pub struct Http {
    transport: Arc<dyn Transport>,
    /// The rate limit tables; exposed so applications can inspect bucket
    /// state.
    pub ratelimiter: Ratelimiter,
    token: SecretString,
    user_agent: String,
    timeout: Duration,
    max_retries: u8,
}

impl Http {
    /// Creates a client with the default configuration for a bot token.
    #[must_use]
    pub fn new(token: &str) -> Self {
        HttpBuilder::new(token).build().expect("default configuration is valid")
    }

    /// Performs a request, rate limiting it as necessary.
    ///
    /// Returns the raw [`Response`]. Use [`Self::fire`] to deserialize the
    /// body into some type.
    ///
    /// # Errors
    ///
    /// Validation failures surface as [`ErrorKind::InvalidParam`] before any
    /// transport call. Statuses at or above 400 surface as
    /// [`HttpError::UnsuccessfulRequest`] carrying everything that could be
    /// parsed out of the response; a 429 does so only once `max_retries`
    /// attempts are spent.
    ///
    /// [`ErrorKind::InvalidParam`]: crate::ErrorKind::InvalidParam
    pub async fn execute(&self, req: Request) -> Result<Response> {
        req.validate()?;

        let url = req.resolve_url();
        let route = RouteKey::new(req.method, req.api_path());
        let skip_global = req.skips_global();

        let transport_req = TransportRequest {
            method: req.method,
            url: url.clone(),
            headers: self.assemble_headers(&req),
            body: req.body.clone(),
            timeout: req.timeout.unwrap_or(self.timeout),
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;

            self.ratelimiter.pre_hook(&route, skip_global).await?;

            let response = self.transport.perform(transport_req.clone()).await?;

            let body_429 =
                (response.status == 429).then(|| RatelimitBody::parse(&response.body));
            let info = self.ratelimiter.post_hook(&route, &response, body_429.as_ref());

            if response.status == 429 {
                let retry_after = retry_after_seconds(&info, body_429.as_ref());

                if attempts < u32::from(self.max_retries) && retry_after > 0.0 {
                    debug!("Ratelimited on {route} for {retry_after}s; retrying");
                    tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
                    continue;
                }

                return Err(Error::Http(HttpError::UnsuccessfulRequest(ErrorResponse::new(
                    req.method, url, &response,
                ))));
            }

            if response.status >= 400 {
                return Err(Error::Http(HttpError::UnsuccessfulRequest(ErrorResponse::new(
                    req.method, url, &response,
                ))));
            }

            return Ok(Response {
                status: response.status,
                headers: response.headers,
                body: response.body,
                ratelimit: info,
            });
        }
    }

    /// Performs a request and deserializes the response body.
    ///
    /// # Errors
    ///
    /// Everything [`Self::execute`] returns, plus [`Error::Json`] when the
    /// body does not decode as a `T`.
    pub async fn fire<T: DeserializeOwned>(&self, req: Request) -> Result<T> {
        let response = self.execute(req).await?;
        json::from_slice(&response.body)
    }

    /// The headers the client sends: its own first, the caller's after, in
    /// order.
    fn assemble_headers(&self, req: &Request) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(req.headers.len() + 3);
        headers.push(("Authorization".to_owned(), self.token.expose_secret().to_owned()));
        headers.push(("User-Agent".to_owned(), self.user_agent.clone()));

        if req.json {
            headers.push(("Content-Type".to_owned(), "application/json".to_owned()));
        }

        headers.extend(req.headers.iter().cloned());
        headers
    }
}

impl fmt::Debug for Http {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http")
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl AsRef<Http> for Http {
    fn as_ref(&self) -> &Http {
        self
    }
}

/// A response with a status below 400: the raw status, headers and body,
/// plus the rate limit snapshot parsed out of the headers.
#[derive(Clone, Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub ratelimit: RatelimitInfo,
}

impl Response {
    /// Returns the value of the first header matching `name`,
    /// case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Checks a user agent against the shape Discord documents:
/// `DiscordBot ($url, $version)`.
fn valid_user_agent(user_agent: &str) -> bool {
    let Some(rest) = user_agent.strip_prefix("DiscordBot (") else {
        return false;
    };
    let Some(inner) = rest.strip_suffix(')') else {
        return false;
    };

    match inner.split_once(',') {
        Some((url, version)) => !url.trim().is_empty() && !version.trim().is_empty(),
        None => false,
    }
}

fn format_token(token: &str, auth_type: AuthType) -> String {
    let token = token
        .trim()
        .trim_start_matches("Bot ")
        .trim_start_matches("Bearer ")
        .trim();

    match auth_type {
        AuthType::Bot => format!("Bot {token}"),
        AuthType::Bearer => format!("Bearer {token}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_shape() {
        assert!(valid_user_agent("DiscordBot (https://example.com, 1.2.3)"));
        assert!(valid_user_agent(constants::USER_AGENT));
        assert!(!valid_user_agent("curl/8.0"));
        assert!(!valid_user_agent("DiscordBot ()"));
        assert!(!valid_user_agent("DiscordBot (https://example.com)"));
    }

    #[test]
    fn rejected_user_agent_fails_the_build() {
        let err = HttpBuilder::new("token")
            .user_agent("not a discord bot")
            .build()
            .expect_err("invalid user agent");
        assert_eq!(err.kind(), crate::ErrorKind::InvalidParam);
    }

    #[test]
    fn token_formatting() {
        assert_eq!(format_token("abc", AuthType::Bot), "Bot abc");
        assert_eq!(format_token("Bot abc\n", AuthType::Bot), "Bot abc");
        assert_eq!(format_token("abc", AuthType::Bearer), "Bearer abc");
    }
}
