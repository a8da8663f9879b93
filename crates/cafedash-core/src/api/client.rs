//! HTTP transport for the Cafe-Dash REST API.
//!
//! `ApiClient` knows nothing about sessions: callers hand it the token to
//! attach. It also serves as the authentication endpoint for the session
//! manager through [`AuthBackend`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::TransportError;
use crate::auth::{AuthBackend, LoginRequest, LoginResponse, RefreshResponse};
use crate::config::Config;

// ============================================================================
// Constants
// ============================================================================

/// Path of the login endpoint, relative to the base URL
const LOGIN_PATH: &str = "login";

/// Path of the token refresh endpoint, relative to the base URL
const REFRESH_PATH: &str = "refresh";

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    initial_backoff: Duration,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::from_reqwest(&e))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        Self::with_timeout(&config.api_base_url, config.request_timeout())
    }

    /// Override the first rate-limit backoff delay; it doubles on every retry.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn auth_headers(token: Option<&str>) -> Result<header::HeaderMap, TransportError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| TransportError::normalize(None, None, Some("Invalid session token")))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should
    /// retry), or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, TransportError> {
        let status = response.status();
        if status.is_success() {
            Ok(Some(response))
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            let body = response.text().await.unwrap_or_default();
            debug!(status = %status, body = %TransportError::truncate_body(&body), "Request failed");
            Err(TransportError::from_status(status, &body))
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| TransportError::invalid_response(Some(status), e))
    }

    /// Send a JSON request, attaching `token` as a bearer credential when given.
    ///
    /// Rate-limited responses are retried with exponential backoff.
    pub async fn request_json<T, B>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&B>,
    ) -> Result<T, TransportError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        let headers = Self::auth_headers(token)?;
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header(header::ACCEPT, "application/json")
                .headers(headers.clone());
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .map_err(|e| TransportError::from_reqwest(&e))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Self::decode(response).await,
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(TransportError::from_status(StatusCode::TOO_MANY_REQUESTS, ""));
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff.as_millis() as u64, "Rate limited, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

#[async_trait]
impl AuthBackend for ApiClient {
    async fn login(&self, identifier: &str, secret: &str) -> Result<LoginResponse, TransportError> {
        let body = LoginRequest { identifier, secret };
        self.request_json(Method::POST, LOGIN_PATH, None, Some(&body))
            .await
    }

    async fn refresh(&self, token: &str) -> Result<RefreshResponse, TransportError> {
        self.request_json::<_, ()>(Method::POST, REFRESH_PATH, Some(token), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Cafe {
        id: i64,
        name: String,
    }

    #[test]
    fn test_url_joining() {
        let client = ApiClient::new("http://localhost:8080/api/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/api");
        assert_eq!(client.url("login"), "http://localhost:8080/api/login");
        assert_eq!(client.url("/cafes/1"), "http://localhost:8080/api/cafes/1");
    }

    #[tokio::test]
    async fn test_login_posts_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_json(serde_json::json!({
                "identifier": "user@x.com",
                "secret": "goodpass"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "abc",
                "user": {"id": 1, "username": "user", "email": "user@x.com"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri()).unwrap();
        let response = client.login("user@x.com", "goodpass").await.unwrap();

        assert_eq!(response.token, "abc");
        assert_eq!(response.user.map(|u| u.username), Some("user".to_string()));
    }

    #[tokio::test]
    async fn test_login_without_user_profile() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "abc"})))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri()).unwrap();
        let response = client.login("user@x.com", "goodpass").await.unwrap();
        assert!(response.user.is_none());
    }

    #[tokio::test]
    async fn test_login_rejection_carries_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({"message": "Bad credentials"})),
            )
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri()).unwrap();
        let err = client.login("user@x.com", "badpass").await.unwrap_err();

        assert_eq!(err.status, Some(401));
        assert_eq!(err.message, "Bad credentials");
    }

    #[tokio::test]
    async fn test_refresh_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/refresh"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "def"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri()).unwrap();
        assert_eq!(client.refresh("abc").await.unwrap().token, "def");
    }

    #[tokio::test]
    async fn test_request_json_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cafes/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1, "name": "Bean There"})))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri()).unwrap();
        let cafe: Cafe = client
            .request_json::<_, ()>(Method::GET, "cafes/1", None, None)
            .await
            .unwrap();
        assert_eq!(
            cafe,
            Cafe {
                id: 1,
                name: "Bean There".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cafes/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri()).unwrap();
        let err = client
            .request_json::<Cafe, ()>(Method::GET, "cafes/1", None, None)
            .await
            .unwrap_err();
        assert!(err.message.starts_with("Invalid response"));
    }

    #[tokio::test]
    async fn test_rate_limit_gives_up_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cafes"))
            .respond_with(ResponseTemplate::new(429))
            .expect(u64::from(MAX_RATE_LIMIT_RETRIES) + 1)
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri())
            .unwrap()
            .with_initial_backoff(Duration::from_millis(1));
        let err = client
            .request_json::<serde_json::Value, ()>(Method::GET, "cafes", None, None)
            .await
            .unwrap_err();

        assert_eq!(err.status, Some(429));
        assert!(err.message.contains("Rate limited"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let client = ApiClient::with_timeout("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = client.login("user@x.com", "goodpass").await.unwrap_err();

        assert_eq!(err.status, None);
        assert!(!err.message.is_empty());
    }
}
