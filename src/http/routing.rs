//! Route keys are used for ratelimiting. These differentiate between the
//! different _types_ of routes - such as getting the current user's guilds -
//! with the exception being major parameters.
//!
//! From the Discord docs, rate limits take into account major parameters in
//! the URL: `/channels/10/messages/11` and `/channels/10/messages/12` count
//! towards the same limit, while `/channels/4/messages/7` tracks separately,
//! because the channel id, the major parameter, differs.
//!
//! A key is computed, not enumerated: the method verb, followed by the path
//! with every numeric segment replaced by `:id` and a webhook token replaced
//! by `:token`. This keeps the rate limiter correct for endpoints the library
//! has never heard of, and keeps webhook tokens out of the bucket tables.

use std::fmt;

use super::LightMethod;

/// The names of the path segments whose trailing id scopes a rate limit.
const MAJOR_SEGMENTS: [&str; 4] = ["channels", "guilds", "webhooks", "interactions"];

/// The canonical identity of an endpoint for rate limiting: the normalized
/// `VERB /path` string plus the major parameter, used as the local bucket key
/// until the server reveals its own bucket id.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RouteKey {
    key: String,
    major: String,
}

impl RouteKey {
    /// Computes the key for a request. `path` may be relative (`/channels/1`)
    /// or a full `https://discord.com/api/v10/...` URL; query strings are
    /// ignored.
    #[must_use]
    pub fn new(method: LightMethod, path: &str) -> Self {
        let path = strip_api_prefix(path);
        let path = path.split('?').next().unwrap_or("");
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut key = String::with_capacity(path.len() + 8);
        key.push_str(method.name());
        key.push(' ');

        let mut major = None;

        for (i, segment) in segments.iter().enumerate() {
            key.push('/');

            if i >= 2 && segments[i - 2] == "webhooks" && is_numeric(segments[i - 1]) {
                key.push_str(":token");
                continue;
            }

            if is_numeric(segment) {
                key.push_str(":id");

                if major.is_none() && i > 0 && MAJOR_SEGMENTS.contains(&segments[i - 1]) {
                    major = Some((*segment).to_owned());
                }
            } else {
                key.push_str(segment);
            }
        }

        if segments.is_empty() {
            key.push('/');
        }

        Self {
            key,
            major: major.unwrap_or_else(|| "global".to_owned()),
        }
    }

    /// The normalized `VERB /path` form of the route.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The major parameter, or the literal `global` when the route has none.
    #[must_use]
    pub fn major(&self) -> &str {
        &self.major
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.key, self.major)
    }
}

/// Reduces a full API URL to its path below `/api/v10`. Relative paths pass
/// through untouched.
fn strip_api_prefix(path: &str) -> &str {
    if path.starts_with('/') {
        return path;
    }

    match path.find("/api/v10") {
        Some(idx) => &path[idx + "/api/v10".len()..],
        None => path,
    }
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
