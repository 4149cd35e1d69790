use std::sync::Arc;

use thiserror::Error;

use crate::api::ApiError;

/// Failures surfaced by the session layer.
///
/// `Clone` so a single refresh settlement can be handed to every waiter.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Access token expired and no refresh token is available")]
    ExpiredNoRefresh,

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Token refresh rejected: {0}")]
    RefreshRejected(Arc<ApiError>),

    #[error("Unauthorized - session could not be renewed")]
    Unauthorized,

    #[error("Session ended before token refresh completed")]
    SessionEnded,

    #[error(transparent)]
    Api(Arc<ApiError>),

    #[error("Credential storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Whether the caller now has to log in again
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            AuthError::ExpiredNoRefresh
                | AuthError::NoRefreshToken
                | AuthError::RefreshRejected(_)
                | AuthError::Unauthorized
                | AuthError::SessionEnded
        )
    }
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => AuthError::Unauthorized,
            other => AuthError::Api(Arc::new(other)),
        }
    }
}
