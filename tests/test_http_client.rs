//! End-to-end tests of the REST client against a scripted transport.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use accord::http::{
    Http, HttpBuilder, HttpError, LightMethod, Request, Transport, TransportRequest,
    TransportResponse,
};
use accord::{Error, ErrorKind};
use async_trait::async_trait;

/// A transport that replays canned responses in order and records every
/// request it is handed. Once the script runs out it keeps answering with the
/// last response.
struct MockTransport {
    responses: Mutex<Vec<TransportResponse>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    fn new(responses: Vec<TransportResponse>) -> Arc<Self> {
        assert!(!responses.is_empty(), "script needs at least one response");

        Arc::new(Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().expect("not poisoned").len()
    }

    fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("not poisoned").clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn perform(&self, request: TransportRequest) -> accord::Result<TransportResponse> {
        self.requests.lock().expect("not poisoned").push(request);

        let mut responses = self.responses.lock().expect("not poisoned");
        if responses.len() > 1 {
            Ok(responses.remove(0))
        } else {
            Ok(responses[0].clone())
        }
    }
}

fn response(status: u16, headers: &[(&str, &str)], body: &str) -> TransportResponse {
    TransportResponse {
        status,
        headers: headers.iter().map(|&(k, v)| (k.to_owned(), v.to_owned())).collect(),
        body: body.as_bytes().to_vec(),
    }
}

fn ok() -> TransportResponse {
    response(200, &[("X-RateLimit-Limit", "5"), ("X-RateLimit-Remaining", "4")], "{}")
}

fn client(transport: Arc<MockTransport>) -> Http {
    HttpBuilder::new("sekrit")
        .transport(transport)
        .build()
        .expect("valid configuration")
}

#[tokio::test]
async fn injects_auth_and_user_agent_exactly_once() {
    let transport = MockTransport::new(vec![ok()]);
    let http = client(Arc::clone(&transport));

    let request = Request::new(LightMethod::Post, "/channels/111/messages")
        .json(br#"{"content":"hi"}"#.to_vec())
        .header("X-Audit-Log-Reason", "testing");
    http.execute(request).await.expect("success");

    let sent = &transport.requests()[0];
    let count = |name: &str| {
        sent.headers.iter().filter(|(key, _)| key.eq_ignore_ascii_case(name)).count()
    };

    assert_eq!(count("authorization"), 1);
    assert_eq!(count("user-agent"), 1);
    assert_eq!(count("content-type"), 1);
    assert_eq!(count("x-audit-log-reason"), 1);

    let auth = sent
        .headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("authorization"))
        .map(|(_, value)| value.as_str());
    assert_eq!(auth, Some("Bot sekrit"));

    let content_type = sent
        .headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.as_str());
    assert_eq!(content_type, Some("application/json"));

    assert_eq!(sent.url, "https://discord.com/api/v10/channels/111/messages");
}

#[tokio::test]
async fn caller_supplied_authorization_never_reaches_the_wire() {
    let transport = MockTransport::new(vec![ok()]);
    let http = client(Arc::clone(&transport));

    let request = Request::new(LightMethod::Post, "/channels/111/polls/222/expire")
        .header("Authorization", "Bot other");
    let err = http.execute(request).await.expect_err("reserved header");

    assert_eq!(err.kind(), ErrorKind::InvalidParam);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn plain_http_urls_are_rejected_before_transport() {
    let transport = MockTransport::new(vec![ok()]);
    let http = client(Arc::clone(&transport));

    let request = Request::new(LightMethod::Get, "http://discord.com/api/v10/users/@me");
    let err = http.execute(request).await.expect_err("bad scheme");

    assert_eq!(err.kind(), ErrorKind::InvalidParam);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn raw_bodies_need_a_content_type_and_pass_through_verbatim() {
    let transport = MockTransport::new(vec![ok()]);
    let http = client(Arc::clone(&transport));

    let bare = Request::new(LightMethod::Post, "/channels/123/messages")
        .body(b"payload=1".to_vec());
    let err = http.execute(bare).await.expect_err("missing content type");
    assert_eq!(err.kind(), ErrorKind::InvalidParam);
    assert_eq!(transport.calls(), 0);

    let typed = Request::new(LightMethod::Post, "/channels/123/messages")
        .body(b"payload=1".to_vec())
        .header("Content-Type", "application/x-www-form-urlencoded");
    http.execute(typed).await.expect("success");

    assert_eq!(transport.calls(), 1);
    assert_eq!(transport.requests()[0].body.as_deref(), Some(b"payload=1".as_slice()));
}

#[tokio::test]
async fn error_bodies_are_parsed_into_the_error() {
    let transport = MockTransport::new(vec![response(
        400,
        &[],
        r#"{"code":50035,"message":"Invalid Form Body"}"#,
    )]);
    let http = client(Arc::clone(&transport));

    let request =
        Request::new(LightMethod::Post, "/channels/123/messages").json(b"{}".to_vec());
    let err = http.execute(request).await.expect_err("bad request");

    assert_eq!(err.kind(), ErrorKind::BadRequest);
    match err {
        Error::Http(HttpError::UnsuccessfulRequest(response)) => {
            assert_eq!(response.status_code, 400);
            assert_eq!(response.error.code, 50035);
            assert_eq!(response.error.message, "Invalid Form Body");
        },
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn one_429_is_retried_and_a_second_surfaces() {
    let ratelimited = response(
        429,
        &[("Retry-After", "0.01")],
        r#"{"retry_after":0.01,"global":false,"message":"You are being rate limited."}"#,
    );

    // First script: a 429 followed by a success. One retry, then Ok.
    let transport = MockTransport::new(vec![ratelimited.clone(), ok()]);
    let http = HttpBuilder::new("sekrit")
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .max_retries(2)
        .build()
        .expect("valid configuration");

    let request = Request::new(LightMethod::Get, "/users/@me");
    http.execute(request).await.expect("retried into success");
    assert_eq!(transport.calls(), 2);

    // Second script: two identical 429s. The budget is spent.
    let transport = MockTransport::new(vec![ratelimited.clone(), ratelimited]);
    let http = HttpBuilder::new("sekrit")
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .max_retries(2)
        .build()
        .expect("valid configuration");

    let request = Request::new(LightMethod::Get, "/users/@me");
    let err = http.execute(request).await.expect_err("retries exhausted");

    assert_eq!(err.kind(), ErrorKind::RateLimited);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn invalid_request_window_blocks_locally() {
    let transport = MockTransport::new(vec![response(401, &[], r#"{"code":0,"message":"401: Unauthorized"}"#)]);
    let http = HttpBuilder::new("sekrit")
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .invalid_request_limit(3, Duration::from_secs(600))
        .max_retries(1)
        .build()
        .expect("valid configuration");

    for _ in 0..3 {
        let request = Request::new(LightMethod::Get, "/users/@me");
        let err = http.execute(request).await.expect_err("unauthorized");
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
    assert_eq!(transport.calls(), 3);

    // The window has tripped; the next request never reaches the transport.
    let request = Request::new(LightMethod::Get, "/users/@me");
    let err = http.execute(request).await.expect_err("blocked locally");
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn global_window_delays_but_interactions_bypass_it() {
    let transport = MockTransport::new(vec![ok()]);
    let http = HttpBuilder::new("sekrit")
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .global_ratelimit(1, Duration::from_millis(100))
        .build()
        .expect("valid configuration");

    // Two interaction requests sail through without waiting on the window.
    let started = Instant::now();
    for _ in 0..2 {
        let request = Request::new(LightMethod::Post, "/interactions/1/abc/callback")
            .json(b"{}".to_vec());
        http.execute(request).await.expect("success");
    }
    assert!(started.elapsed() < Duration::from_millis(80));

    // Two plain requests share a 1-per-100ms window; the second waits.
    let started = Instant::now();
    for _ in 0..2 {
        let request = Request::new(LightMethod::Get, "/users/@me");
        http.execute(request).await.expect("success");
    }
    assert!(started.elapsed() >= Duration::from_millis(80));
}

#[tokio::test]
async fn exhausted_bucket_sleeps_until_reset() {
    let drained = response(
        200,
        &[
            ("X-RateLimit-Limit", "1"),
            ("X-RateLimit-Remaining", "0"),
            ("X-RateLimit-Reset-After", "0.2"),
            ("X-RateLimit-Bucket", "abcd"),
        ],
        "{}",
    );
    let transport = MockTransport::new(vec![drained, ok()]);
    let http = client(Arc::clone(&transport));

    let started = Instant::now();
    for _ in 0..2 {
        let request = Request::new(LightMethod::Get, "/channels/111/messages");
        http.execute(request).await.expect("success");
    }

    // The second request waited for the advertised reset.
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn success_responses_expose_the_ratelimit_snapshot() {
    let transport = MockTransport::new(vec![ok()]);
    let http = client(transport);

    let request = Request::new(LightMethod::Get, "/users/@me");
    let response = http.execute(request).await.expect("success");

    assert_eq!(response.status, 200);
    assert_eq!(response.ratelimit.limit, Some(5));
    assert_eq!(response.ratelimit.remaining, Some(4));
    assert_eq!(response.body, b"{}");
}

#[tokio::test]
async fn fire_decodes_the_body() {
    #[derive(serde::Deserialize)]
    struct CurrentUser {
        id: String,
        username: String,
    }

    let transport =
        MockTransport::new(vec![response(200, &[], r#"{"id":"42","username":"ferris"}"#)]);
    let http = client(transport);

    let user: CurrentUser = http
        .fire(Request::new(LightMethod::Get, "/users/@me"))
        .await
        .expect("decodes");

    assert_eq!(user.id, "42");
    assert_eq!(user.username, "ferris");
}
