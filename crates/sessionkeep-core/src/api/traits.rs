//! Capability traits for the remote API
//!
//! The session core never talks to reqwest directly. It depends on these
//! traits so tests can substitute in-memory fakes for the server.

use async_trait::async_trait;

use super::types::{ApiRequest, ApiResponse, AuthResponse};
use super::ApiError;

/// Calls against the authentication endpoints
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST /auth/login`
    ///
    /// # Errors
    /// Returns `ApiError::Unauthorized` for bad credentials, or a transport
    /// error
    async fn login(&self, username: &str, password: &str) -> Result<AuthResponse, ApiError>;

    /// `POST /auth/refresh`
    ///
    /// # Errors
    /// Returns error if the refresh token is rejected or the call fails
    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, ApiError>;

    /// `POST /auth/logout`, best-effort
    async fn logout(&self, refresh_token: Option<&str>) -> Result<(), ApiError>;
}

/// Generic request sending capability
///
/// Implementations must return `ApiError::Unauthorized` for a 401 response so
/// the mediator can recognise it.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}
