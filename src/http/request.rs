use std::time::Duration;

use url::Url;

use super::{HttpError, LightMethod};
use crate::internal::prelude::*;

/// A request to the REST API, as the caller hands it to [`Http::execute`].
///
/// The `Authorization` and `User-Agent` headers are injected by the client
/// and may not be supplied here; for a JSON body the `Content-Type` is
/// injected too. Anything else, say `X-Audit-Log-Reason`, passes through
/// verbatim, in order.
///
/// [`Http::execute`]: super::Http::execute
#[derive(Clone, Debug)]
pub struct Request {
    pub(super) method: LightMethod,
    pub(super) path: String,
    pub(super) headers: Vec<(String, String)>,
    pub(super) body: Option<Vec<u8>>,
    pub(super) json: bool,
    pub(super) timeout: Option<Duration>,
    pub(super) interaction: bool,
}

impl Request {
    /// Creates a request for a method and path. The path is either relative
    /// to the API base (`/channels/1/messages`) or a full
    /// `https://discord.com/api/v10/...` URL.
    #[must_use]
    pub fn new(method: LightMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            json: false,
            timeout: None,
            interaction: false,
        }
    }

    /// Adds a header. Name comparison is case-insensitive everywhere the
    /// client looks at headers.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attaches an opaque body. A `Content-Type` header must accompany it.
    #[must_use]
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Attaches a body of already-serialized JSON; the client will set
    /// `Content-Type: application/json`.
    #[must_use]
    pub fn json(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self.json = true;
        self
    }

    /// Overrides the client's default timeout for this request only.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Marks the request as an interaction response, which bypasses the
    /// global window the way `/interactions/` routes do.
    #[must_use]
    pub fn interaction(mut self) -> Self {
        self.interaction = true;
        self
    }

    /// The path below `/api/v10`, however the request was addressed.
    pub(super) fn api_path(&self) -> &str {
        if self.path.starts_with('/') {
            return &self.path;
        }

        match self.path.find("/api/v10") {
            Some(idx) => &self.path[idx + "/api/v10".len()..],
            None => &self.path,
        }
    }

    /// Whether the request skips the global window.
    pub(super) fn skips_global(&self) -> bool {
        self.interaction || self.api_path().starts_with("/interactions/")
    }

    /// Checks everything that can be checked without touching the network.
    /// Runs before any side effect, so a rejected request consumes no retry
    /// and no rate limit slot.
    pub(super) fn validate(&self) -> Result<()> {
        for (name, _) in &self.headers {
            let reserved = name.eq_ignore_ascii_case("authorization")
                || name.eq_ignore_ascii_case("user-agent")
                || (self.json && name.eq_ignore_ascii_case("content-type"));

            if reserved {
                return Err(Error::Http(HttpError::ReservedHeader(name.clone())));
            }
        }

        let has_body = self.body.as_ref().is_some_and(|body| !body.is_empty());
        let has_content_type =
            self.headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("content-type"));

        if has_body && !self.json && !has_content_type {
            return Err(Error::Http(HttpError::MissingContentType));
        }

        if !self.path.starts_with('/') {
            let url = Url::parse(&self.path)
                .map_err(|_| Error::Http(HttpError::InvalidUrl(self.path.clone())))?;

            let valid = url.scheme() == "https"
                && url.host_str() == Some("discord.com")
                && url.path().starts_with("/api/v10");

            if !valid {
                return Err(Error::Http(HttpError::InvalidUrl(self.path.clone())));
            }
        }

        Ok(())
    }

    /// The fully qualified URL for the transport.
    pub(super) fn resolve_url(&self) -> String {
        if self.path.starts_with('/') {
            format!("{}{}", api!(""), self.path)
        } else {
            self.path.clone()
        }
    }
}
