//! API client for communicating with the project management REST API.
//!
//! `ApiClient` is the production implementation of both [`AuthApi`] and
//! [`HttpTransport`]. It does not hold a token itself; bearer tokens are
//! attached per request by the request mediator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::{debug, warn};

use super::traits::{AuthApi, HttpTransport};
use super::types::{
    ApiRequest, ApiResponse, AuthResponse, LoginRequest, LogoutRequest, RefreshRequest,
    LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH,
};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    initial_backoff_ms: u64,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url` (e.g. `http://localhost:8080/api`)
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            initial_backoff_ms: INITIAL_BACKOFF_MS,
        })
    }

    /// Override the initial 429 backoff (tests use a few milliseconds)
    pub fn with_initial_backoff(mut self, backoff_ms: u64) -> Self {
        self.initial_backoff_ms = backoff_ms;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a request, backing off and retrying while the server rate limits us
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.url(&request.path);
        let mut retries = 0;
        let mut backoff_ms = self.initial_backoff_ms;

        loop {
            let mut builder = self
                .client
                .request(request.method.clone(), &url)
                .header(header::ACCEPT, "application/json");
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            if let Some(ref token) = request.bearer {
                builder = builder.bearer_auth(token);
            }
            if let Some(ref body) = request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await?;
                    debug!(method = %request.method, path = %request.path, status, "Request completed");
                    return Ok(ApiResponse { status, body });
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(path = %request.path, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn post_auth<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<ApiResponse, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request: {}", e)))?;
        self.execute(&ApiRequest::post(path, body)).await
    }
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn login(&self, username: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let response = self
            .post_auth(LOGIN_PATH, &LoginRequest { username, password })
            .await?;
        response.json()
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, ApiError> {
        let response = self
            .post_auth(REFRESH_PATH, &RefreshRequest { refresh_token })
            .await?;
        response.json()
    }

    async fn logout(&self, refresh_token: Option<&str>) -> Result<(), ApiError> {
        self.post_auth(LOGOUT_PATH, &LogoutRequest { refresh_token })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl HttpTransport for ApiClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.execute(&request).await
    }
}
