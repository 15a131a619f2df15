//! Rate limit bookkeeping for the REST client.
//!
//! Three independent gates are consulted, in order, before every transport
//! call:
//!
//! 1. the **invalid-request window**, a safety cap on 401/403/429 responses
//!    that refuses to send anything once tripped, to keep the client clear of
//!    Cloudflare bans;
//! 2. the **global window**, Discord's client-wide requests-per-second cap,
//!    separate from any per-route limit;
//! 3. the **bucket** for the route, either the locally computed
//!    [`RouteKey`] or, once the server has revealed one via
//!    `X-RateLimit-Bucket`, the server-assigned bucket id scoped by the major
//!    parameter.
//!
//! After every response the headers are folded back into the tables. All
//! tables live under a single mutex; the gates compute a wake-up instant
//! under the lock and the actual sleeping happens with the lock released, so
//! a slow route never stalls bookkeeping for the rest of the client.
//!
//! Two concurrent requests on the same route may both observe a free slot,
//! issue, and race their updates. That race is benign: the server is the
//! ultimate arbiter, and the 429 retry path absorbs the collision.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use super::routing::RouteKey;
use super::transport::TransportResponse;
use super::HttpError;
use crate::internal::prelude::*;

/// A snapshot of the `X-RateLimit-*` headers of one response. Values the
/// server did not send (or sent malformed) are `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RatelimitInfo {
    /// The total number of requests the bucket allows per window.
    pub limit: Option<u64>,
    /// The number of requests remaining in the window.
    pub remaining: Option<u64>,
    /// When the window resets, in fractional epoch seconds.
    pub reset: Option<f64>,
    /// Seconds until the window resets; immune to clock skew and preferred
    /// over [`Self::reset`] when both are present.
    pub reset_after: Option<f64>,
    /// Seconds to wait before retrying, sent on 429s.
    pub retry_after: Option<f64>,
    /// Whether the limit that was hit is the global one.
    pub global: bool,
    /// The scope of a 429: `user`, `global` or `shared`.
    pub scope: Option<String>,
    /// The server-assigned bucket id for the route.
    pub bucket: Option<String>,
}

impl RatelimitInfo {
    pub(crate) fn parse(response: &TransportResponse) -> Self {
        Self {
            limit: parse_header(response, "x-ratelimit-limit"),
            remaining: parse_header(response, "x-ratelimit-remaining"),
            reset: parse_header(response, "x-ratelimit-reset"),
            reset_after: parse_header(response, "x-ratelimit-reset-after"),
            retry_after: parse_header(response, "retry-after")
                .or_else(|| parse_header(response, "x-ratelimit-retry-after")),
            global: parse_header(response, "x-ratelimit-global").unwrap_or(false),
            scope: response.header("x-ratelimit-scope").map(str::to_owned),
            bucket: response.header("x-ratelimit-bucket").map(str::to_owned),
        }
    }
}

fn parse_header<T: FromStr>(response: &TransportResponse, name: &str) -> Option<T> {
    response.header(name).and_then(|value| value.trim().parse().ok())
}

/// The body of a 429 response.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RatelimitBody {
    #[serde(default)]
    pub retry_after: Option<f64>,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub code: Option<isize>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RatelimitBody {
    pub(crate) fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

/// The known rate limit state of one bucket.
///
/// **Note**: You should _not_ mutate any of the fields, as this can help
/// cause 429s.
#[derive(Clone, Copy, Debug)]
pub struct Ratelimit {
    limit: i64,
    remaining: i64,
    reset_at: Option<Instant>,
}

impl Ratelimit {
    fn new() -> Self {
        Self {
            limit: i64::MAX,
            remaining: i64::MAX,
            reset_at: None,
        }
    }

    /// The total number of requests that can be made in a period of time.
    #[must_use]
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// The number of requests remaining in the period of time.
    #[must_use]
    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    /// When the bucket refills, on the monotonic clock.
    #[must_use]
    pub fn reset_at(&self) -> Option<Instant> {
        self.reset_at
    }

    /// Accounts for one request about to be issued. Returns when to wake up
    /// and try again instead, if the bucket is exhausted.
    fn pre_hook(&mut self, now: Instant) -> Option<Instant> {
        if let Some(reset_at) = self.reset_at {
            if now >= reset_at {
                // The window rolled over on its own.
                self.remaining = self.limit;
                self.reset_at = None;
            } else if self.remaining == 0 {
                return Some(reset_at);
            }
        }

        if self.remaining != i64::MAX && self.remaining > 0 {
            self.remaining -= 1;
        }

        None
    }

    fn update(&mut self, info: &RatelimitInfo, reset_at: Option<Instant>) {
        if let Some(limit) = info.limit {
            self.limit = limit as i64;
        }

        if let Some(remaining) = info.remaining {
            self.remaining = remaining as i64;
        }

        if reset_at.is_some() {
            self.reset_at = reset_at;
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct RollingWindow {
    start: Instant,
    count: u32,
}

#[derive(Default)]
struct RatelimiterState {
    /// Buckets under their locally computed identity, used until the server
    /// reveals the real bucket id.
    routes: HashMap<RouteKey, Ratelimit>,
    /// Buckets under their server-assigned identity, keyed by
    /// `(bucket id, major parameter)`.
    buckets: HashMap<(String, String), Ratelimit>,
    /// Which server bucket each route currently resolves to.
    route_to_bucket: HashMap<String, String>,
    global: Option<RollingWindow>,
    global_block: Option<Instant>,
    invalid: Option<RollingWindow>,
    invalid_block: Option<Instant>,
}

impl RatelimiterState {
    fn resolve_bucket(&mut self, route: &RouteKey) -> &mut Ratelimit {
        let discovered = self.route_to_bucket.get(route.key()).cloned();

        match discovered {
            Some(id) => self
                .buckets
                .entry((id, route.major().to_owned()))
                .or_insert_with(Ratelimit::new),
            None => self.routes.entry(route.clone()).or_insert_with(Ratelimit::new),
        }
    }

    fn global_wake(&mut self, now: Instant, limit: u32, window: Duration) -> Option<Instant> {
        if let Some(until) = self.global_block {
            if now < until {
                return Some(until);
            }
            self.global_block = None;
        }

        match &mut self.global {
            Some(w) if now.duration_since(w.start) >= window => {
                w.start = now;
                w.count = 1;
                None
            },
            Some(w) if w.count >= limit => Some(w.start + window),
            Some(w) => {
                w.count += 1;
                None
            },
            None => {
                self.global = Some(RollingWindow {
                    start: now,
                    count: 1,
                });
                None
            },
        }
    }

    fn record_invalid(&mut self, now: Instant, limit: u32, window: Duration) {
        let w = match &mut self.invalid {
            Some(w) if now.duration_since(w.start) >= window => {
                w.start = now;
                w.count = 1;
                w
            },
            Some(w) => {
                w.count += 1;
                w
            },
            None => self.invalid.insert(RollingWindow {
                start: now,
                count: 1,
            }),
        };

        if w.count >= limit {
            self.invalid_block = Some(w.start + window);
        }
    }
}

/// Tracks every rate limit gate of the REST client: the per-bucket tables,
/// the global window, and the invalid-request window.
///
/// The limiter is internally synchronized; one instance is shared by all
/// concurrent calls on its [`Http`] client. Buckets are never evicted; their
/// number is bounded by the number of distinct route shapes the process
/// touches.
///
/// [`Http`]: super::Http
pub struct Ratelimiter {
    state: Mutex<RatelimiterState>,
    global_limit: u32,
    global_window: Duration,
    invalid_limit: u32,
    invalid_window: Duration,
    /// Epoch/monotonic correspondence captured once at creation, so that
    /// `X-RateLimit-Reset` stays meaningful even if the system clock jumps.
    clock_anchor: (SystemTime, Instant),
}

impl Ratelimiter {
    pub(super) fn new(
        global_limit: u32,
        global_window: Duration,
        invalid_limit: u32,
        invalid_window: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(RatelimiterState::default()),
            global_limit,
            global_window,
            invalid_limit,
            invalid_window,
            clock_anchor: (SystemTime::now(), Instant::now()),
        }
    }

    /// A copy of the current state of the bucket a route resolves to, if one
    /// has been created.
    #[must_use]
    pub fn bucket(&self, route: &RouteKey) -> Option<Ratelimit> {
        let state = self.state.lock();

        let discovered = state.route_to_bucket.get(route.key()).cloned();
        match discovered {
            Some(id) => state.buckets.get(&(id, route.major().to_owned())).copied(),
            None => state.routes.get(route).copied(),
        }
    }

    /// Consults the three gates in order, sleeping where a gate demands it.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::TooManyInvalidRequests`] without sleeping when the
    /// invalid-request window has tripped.
    pub async fn pre_hook(&self, route: &RouteKey, skip_global: bool) -> Result<()> {
        {
            let mut state = self.state.lock();
            if let Some(until) = state.invalid_block {
                if Instant::now() < until {
                    return Err(Error::Http(HttpError::TooManyInvalidRequests));
                }
                state.invalid_block = None;
                state.invalid = None;
            }
        }

        if !skip_global {
            loop {
                let wake = {
                    let mut state = self.state.lock();
                    state.global_wake(Instant::now(), self.global_limit, self.global_window)
                };

                match wake {
                    Some(until) => {
                        debug!("Globally ratelimited until {until:?}");
                        tokio::time::sleep_until(until.into()).await;
                    },
                    None => break,
                }
            }
        }

        loop {
            let wake = {
                let mut state = self.state.lock();
                state.resolve_bucket(route).pre_hook(Instant::now())
            };

            match wake {
                Some(until) => {
                    debug!("Pre-emptive ratelimit on route {route} until {until:?}");
                    tokio::time::sleep_until(until.into()).await;
                },
                None => break,
            }
        }

        Ok(())
    }

    /// Folds a response's rate limit headers back into the tables and returns
    /// the parsed snapshot. `body` is the parsed body when the response was a
    /// 429.
    pub(super) fn post_hook(
        &self,
        route: &RouteKey,
        response: &TransportResponse,
        body: Option<&RatelimitBody>,
    ) -> RatelimitInfo {
        let info = RatelimitInfo::parse(response);
        let now = Instant::now();
        let reset_at = self.reset_instant(&info, now);

        let mut state = self.state.lock();

        if let Some(bucket_id) = &info.bucket {
            // The server named the bucket: move the route over to it.
            state.route_to_bucket.insert(route.key().to_owned(), bucket_id.clone());
            state
                .buckets
                .entry((bucket_id.clone(), route.major().to_owned()))
                .or_insert_with(Ratelimit::new)
                .update(&info, reset_at);
        } else {
            state.resolve_bucket(route).update(&info, reset_at);
        }

        if matches!(response.status, 401 | 403 | 429) {
            state.record_invalid(now, self.invalid_limit, self.invalid_window);
        }

        if response.status == 429 && (info.global || body.is_some_and(|b| b.global)) {
            let retry_after = retry_after_seconds(&info, body);
            if retry_after > 0.0 {
                debug!("Global ratelimit hit on {route}; blocking for {retry_after}s");
                state.global_block = Some(now + Duration::from_secs_f64(retry_after));
            }
        }

        info
    }

    fn reset_instant(&self, info: &RatelimitInfo, now: Instant) -> Option<Instant> {
        if let Some(after) = info.reset_after {
            return Some(now + Duration::from_secs_f64(after.max(0.0)));
        }

        let reset = info.reset?;
        let (anchor_time, anchor_instant) = self.clock_anchor;
        let anchor_epoch =
            anchor_time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
        let delta = reset - anchor_epoch;

        if delta <= 0.0 {
            Some(anchor_instant)
        } else {
            anchor_instant.checked_add(Duration::from_secs_f64(delta))
        }
    }
}

/// The larger of the header and body retry hints, in seconds.
pub(super) fn retry_after_seconds(info: &RatelimitInfo, body: Option<&RatelimitBody>) -> f64 {
    let header = info.retry_after.unwrap_or(0.0);
    let body = body.and_then(|b| b.retry_after).unwrap_or(0.0);
    header.max(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::LightMethod;

    fn response(status: u16, headers: &[(&str, &str)]) -> TransportResponse {
        TransportResponse {
            status,
            headers: headers.iter().map(|&(k, v)| (k.to_owned(), v.to_owned())).collect(),
            body: Vec::new(),
        }
    }

    fn limiter() -> Ratelimiter {
        Ratelimiter::new(50, Duration::from_secs(1), 3, Duration::from_secs(600))
    }

    #[test]
    fn parses_ratelimit_headers() {
        let response = response(200, &[
            ("X-RateLimit-Limit", "5"),
            ("X-RateLimit-Remaining", "0"),
            ("X-RateLimit-Reset", "1470173023.123"),
            ("X-RateLimit-Reset-After", "1.5"),
            ("X-RateLimit-Bucket", "abcd1234"),
            ("X-RateLimit-Global", "true"),
        ]);

        let info = RatelimitInfo::parse(&response);
        assert_eq!(info.limit, Some(5));
        assert_eq!(info.remaining, Some(0));
        assert_eq!(info.reset, Some(1470173023.123));
        assert_eq!(info.reset_after, Some(1.5));
        assert_eq!(info.bucket.as_deref(), Some("abcd1234"));
        assert!(info.global);
    }

    #[test]
    fn malformed_header_values_read_as_absent() {
        let response = response(200, &[("X-RateLimit-Limit", "soon")]);
        assert_eq!(RatelimitInfo::parse(&response).limit, None);
    }

    #[test]
    fn bucket_gate_blocks_when_exhausted() {
        let mut bucket = Ratelimit::new();
        let now = Instant::now();
        let info = RatelimitInfo {
            limit: Some(2),
            remaining: Some(0),
            ..Default::default()
        };
        bucket.update(&info, Some(now + Duration::from_secs(2)));

        let wake = bucket.pre_hook(now);
        assert_eq!(wake, Some(now + Duration::from_secs(2)));

        // Past the reset the bucket refills on its own.
        let wake = bucket.pre_hook(now + Duration::from_secs(3));
        assert_eq!(wake, None);
        assert_eq!(bucket.remaining(), 1);
    }

    #[test]
    fn responses_migrate_routes_onto_server_buckets() {
        let limiter = limiter();
        let get = RouteKey::new(LightMethod::Get, "/channels/111/messages");
        let post = RouteKey::new(LightMethod::Post, "/channels/111/messages");

        let headers = [
            ("X-RateLimit-Limit", "5"),
            ("X-RateLimit-Remaining", "3"),
            ("X-RateLimit-Reset-After", "5.0"),
            ("X-RateLimit-Bucket", "shared77"),
        ];
        limiter.post_hook(&get, &response(200, &headers), None);
        limiter.post_hook(&post, &response(200, &headers), None);

        // Both routes now resolve to the same server bucket.
        let a = limiter.bucket(&get).expect("bucket exists");
        let b = limiter.bucket(&post).expect("bucket exists");
        assert_eq!(a.limit(), 5);
        assert_eq!(b.limit(), 5);

        // An update through one route is visible through the other.
        let drained = [
            ("X-RateLimit-Limit", "5"),
            ("X-RateLimit-Remaining", "0"),
            ("X-RateLimit-Reset-After", "5.0"),
            ("X-RateLimit-Bucket", "shared77"),
        ];
        limiter.post_hook(&get, &response(200, &drained), None);
        assert_eq!(limiter.bucket(&post).expect("bucket exists").remaining(), 0);
    }

    #[test]
    fn same_bucket_id_differing_major_stays_separate() {
        let limiter = limiter();
        let first = RouteKey::new(LightMethod::Get, "/channels/111/messages");
        let second = RouteKey::new(LightMethod::Get, "/channels/222/messages");

        let headers = |remaining: &'static str| {
            [
                ("X-RateLimit-Limit", "5"),
                ("X-RateLimit-Remaining", remaining),
                ("X-RateLimit-Reset-After", "5.0"),
                ("X-RateLimit-Bucket", "shared77"),
            ]
        };
        limiter.post_hook(&first, &response(200, &headers("0")), None);
        limiter.post_hook(&second, &response(200, &headers("4")), None);

        assert_eq!(limiter.bucket(&first).expect("bucket exists").remaining(), 0);
        assert_eq!(limiter.bucket(&second).expect("bucket exists").remaining(), 4);
    }

    #[tokio::test]
    async fn invalid_request_window_trips_and_recovers() {
        let limiter = Ratelimiter::new(50, Duration::from_secs(1), 3, Duration::from_millis(50));
        let route = RouteKey::new(LightMethod::Get, "/users/@me");

        for _ in 0..3 {
            limiter.post_hook(&route, &response(401, &[]), None);
        }

        let err = limiter.pre_hook(&route, false).await.expect_err("breaker tripped");
        assert_eq!(err.kind(), crate::ErrorKind::InvalidState);

        // Once the window has passed the breaker resets.
        tokio::time::sleep(Duration::from_millis(60)).await;
        limiter.pre_hook(&route, false).await.expect("breaker recovered");
    }

    #[tokio::test]
    async fn global_429_blocks_until_retry_after() {
        let limiter = limiter();
        let route = RouteKey::new(LightMethod::Get, "/users/@me");

        let body = RatelimitBody {
            retry_after: Some(0.05),
            global: true,
            ..Default::default()
        };
        limiter.post_hook(&route, &response(429, &[("Retry-After", "0.05")]), Some(&body));

        let before = Instant::now();
        limiter.pre_hook(&route, false).await.expect("block expires");
        assert!(before.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn reset_epoch_converts_through_the_anchor() {
        let limiter = limiter();
        let now = Instant::now();

        let epoch_now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock after epoch")
            .as_secs_f64();
        let info = RatelimitInfo {
            reset: Some(epoch_now + 2.0),
            ..Default::default()
        };

        let reset_at = limiter.reset_instant(&info, now).expect("in range");
        let delta = reset_at.duration_since(now).as_secs_f64();
        assert!((1.5..=2.5).contains(&delta), "delta was {delta}");
    }

    #[test]
    fn reset_after_takes_precedence_over_reset() {
        let limiter = limiter();
        let now = Instant::now();

        let info = RatelimitInfo {
            reset: Some(0.0),
            reset_after: Some(3.0),
            ..Default::default()
        };

        let reset_at = limiter.reset_instant(&info, now).expect("in range");
        assert_eq!(reset_at, now + Duration::from_secs(3));
    }

    #[test]
    fn larger_retry_hint_wins() {
        let info = RatelimitInfo {
            retry_after: Some(1.0),
            ..Default::default()
        };
        let body = RatelimitBody {
            retry_after: Some(2.5),
            ..Default::default()
        };

        assert_eq!(retry_after_seconds(&info, Some(&body)), 2.5);
        assert_eq!(retry_after_seconds(&info, None), 1.0);
    }
}
