//! The pluggable driver underneath the REST client.
//!
//! A [`Transport`] turns one [`TransportRequest`] into one
//! [`TransportResponse`] and nothing more: it must not inspect rate limit
//! headers, retry, or otherwise interpret Discord semantics. All of that is
//! the job of [`Http`].
//!
//! [`Http`]: super::Http

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder};

use std::time::Duration;

use super::{HttpError, LightMethod};
use crate::internal::prelude::*;

/// A single wire request: method, fully qualified URL, ordered headers, an
/// optional bytes body, and the deadline for the whole transfer.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: LightMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

/// A single wire response. Headers keep the case and order the server sent.
#[derive(Clone, Debug, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TransportResponse {
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

/// A driver that can carry [`TransportRequest`]s to a server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs the request, returning the response regardless of its status
    /// code. Only transfer-level failures (DNS, TCP, TLS, timeout) are errors.
    async fn perform(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// The default [`Transport`], backed by a shared [`reqwest::Client`].
pub struct HttpsTransport {
    client: Client,
}

impl HttpsTransport {
    #[must_use]
    pub fn new() -> Self {
        let client = configure_client_backend(Client::builder())
            .build()
            .expect("Cannot build reqwest::Client");

        Self {
            client,
        }
    }
}

impl Default for HttpsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpsTransport {
    async fn perform(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut headers = HeaderMap::with_capacity(request.headers.len());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| HttpError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| HttpError::InvalidHeader(name.as_str().to_owned()))?;
            headers.append(name, value);
        }

        let mut builder = self
            .client
            .request(request.method.reqwest_method(), &request.url)
            .headers(headers)
            .timeout(request.timeout);

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.as_str().to_owned(), String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(not(feature = "native_tls_backend"))]
fn configure_client_backend(builder: ClientBuilder) -> ClientBuilder {
    builder.use_rustls_tls()
}

#[cfg(feature = "native_tls_backend")]
fn configure_client_backend(builder: ClientBuilder) -> ClientBuilder {
    builder.use_native_tls()
}
