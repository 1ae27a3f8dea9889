//! Shared HTTP client for service handlers.
//!
//! Every HTTP based service owns one [`HttpTransport`], built from its
//! descriptor so that `verify=no` disables certificate checks for that
//! service only. Handlers assemble requests with the underlying
//! [`reqwest::Client`] and pass them to [`HttpTransport::send`], which turns
//! non-success statuses into [`TransportError::Status`].
//!
//! # Example
//!
//! ```rust,ignore
//! use clarion_transport::{Auth, HttpTransport};
//!
//! let transport = HttpTransport::for_descriptor(&descriptor)?;
//! let response = transport
//!     .post_json("https://hooks.example.com/notify", &Auth::Bearer(token), &[], &payload)
//!     .await?;
//! ```

use std::time::Duration;

use bytes::Bytes;
use clarion_core::ServiceDescriptor;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::{TransportError, TransportResult};

/// Default overall request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// User agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("Clarion/", env!("CARGO_PKG_VERSION"));

/// Longest response body excerpt kept in errors.
const ERROR_BODY_LIMIT: usize = 256;

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Verify TLS certificates.
    pub verify: bool,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            verify: true,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl TransportOptions {
    /// Options honoring the descriptor's `verify` flag.
    pub fn for_descriptor(descriptor: &ServiceDescriptor) -> Self {
        Self {
            verify: descriptor.verify(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Request authentication.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Auth {
    #[default]
    None,
    Basic {
        user: String,
        password: Option<String>,
    },
    Bearer(String),
}

impl Auth {
    /// Basic auth from the descriptor's user and password, if a user is set.
    pub fn basic_from(descriptor: &ServiceDescriptor) -> Self {
        match descriptor.user() {
            Some(user) => Self::Basic {
                user: user.to_owned(),
                password: descriptor.password().map(str::to_owned),
            },
            None => Self::None,
        }
    }

    /// Applies this authentication to a request.
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::None => request,
            Self::Basic { user, password } => request.basic_auth(user, password.as_deref()),
            Self::Bearer(token) => request.bearer_auth(token),
        }
    }
}

/// A successful response with its body read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// The body as (lossy) UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> TransportResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }

    /// The `Content-Type` header, if present and readable.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

/// A configured HTTP client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Builds a client with the given options.
    pub fn new(options: &TransportOptions) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent.as_str())
            .danger_accept_invalid_certs(!options.verify)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { client })
    }

    /// Builds a client for the service described by `descriptor`.
    pub fn for_descriptor(descriptor: &ServiceDescriptor) -> TransportResult<Self> {
        Self::new(&TransportOptions::for_descriptor(descriptor))
    }

    /// The underlying client, for assembling requests.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Sends `request`, reads the body and fails on a non-success status.
    pub async fn send(&self, request: RequestBuilder) -> TransportResult<HttpResponse> {
        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        trace!(status = status.as_u16(), bytes = body.len(), "Received response");

        if status.is_success() {
            return Ok(HttpResponse {
                status,
                headers,
                body,
            });
        }

        let retry_after = parse_retry_after(&headers);
        let text = String::from_utf8_lossy(&body);
        let excerpt: String = text.chars().take(ERROR_BODY_LIMIT).collect();
        debug!(status = status.as_u16(), ?retry_after, "Remote service rejected request");
        Err(TransportError::Status {
            status: status.as_u16(),
            body: excerpt,
            retry_after,
        })
    }

    /// Sends `body` as JSON with the given method.
    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        auth: &Auth,
        headers: &[(String, String)],
        body: &T,
    ) -> TransportResult<HttpResponse> {
        let request =
            with_headers(auth.apply(self.client.request(method, url)), headers).json(body);
        self.send(request).await
    }

    /// POSTs `body` as JSON.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        auth: &Auth,
        headers: &[(String, String)],
        body: &T,
    ) -> TransportResult<HttpResponse> {
        self.send_json(Method::POST, url, auth, headers, body).await
    }

    /// Sends raw bytes with the given method.
    pub async fn send_bytes(
        &self,
        method: Method,
        url: &str,
        auth: &Auth,
        headers: &[(String, String)],
        body: Bytes,
    ) -> TransportResult<HttpResponse> {
        let request = with_headers(auth.apply(self.client.request(method, url)), headers).body(body);
        self.send(request).await
    }

    /// GETs `url`.
    pub async fn get(&self, url: &str) -> TransportResult<HttpResponse> {
        self.send(self.client.get(url)).await
    }
}

fn with_headers(mut request: RequestBuilder, headers: &[(String, String)]) -> RequestBuilder {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

/// Parses a `Retry-After` header given in seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use clarion_core::DeliveryError;
    use serde_json::json;

    use super::*;
    use crate::testing::{CannedResponse, CannedServer};

    fn transport() -> HttpTransport {
        HttpTransport::new(&TransportOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn test_post_json_sends_body_and_headers() {
        let server = CannedServer::start(vec![CannedResponse::ok("{\"ok\":true}")]).await;
        let headers = vec![("X-Custom".to_owned(), "yes".to_owned())];

        let response = transport()
            .post_json(
                &server.url("/hook"),
                &Auth::Bearer("tok".into()),
                &headers,
                &json!({ "body": "hi" }),
            )
            .await
            .unwrap();
        assert_eq!(response.json::<serde_json::Value>().unwrap()["ok"], true);

        let request = server.requests().remove(0);
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/hook");
        assert_eq!(request.header("x-custom"), Some("yes"));
        assert_eq!(request.header("authorization"), Some("Bearer tok"));
        assert_eq!(request.json()["body"], "hi");
    }

    #[tokio::test]
    async fn test_error_status_carries_retry_after() {
        let server = CannedServer::start(vec![
            CannedResponse::new(429, "slow down").with_header("Retry-After", "7"),
        ])
        .await;

        let err = transport().get(&server.url("/")).await.unwrap_err();
        match &err {
            TransportError::Status {
                status,
                retry_after,
                body,
            } => {
                assert_eq!(*status, 429);
                assert_eq!(*retry_after, Some(Duration::from_secs(7)));
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(
            DeliveryError::from(err),
            DeliveryError::RateLimited { .. }
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{port}/");

        let err = transport().get(&url).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(DeliveryError::from(err), DeliveryError::Transient(_)));
    }

    #[test]
    fn test_basic_auth_from_descriptor() {
        let d: ServiceDescriptor = "json://bob:pw@host".parse().unwrap();
        assert_eq!(
            Auth::basic_from(&d),
            Auth::Basic {
                user: "bob".into(),
                password: Some("pw".into())
            }
        );
        let anonymous: ServiceDescriptor = "json://host".parse().unwrap();
        assert_eq!(Auth::basic_from(&anonymous), Auth::None);
    }
}
