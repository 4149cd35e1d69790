//! Errors from the HTTP layer, one variant per status class the session
//! layer reacts to differently.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Forbidden (403): {0}")]
    AccessDenied(String),

    #[error("Unauthorized (401) - access token rejected")]
    Unauthorized,

    #[error("Not found (404): {0}")]
    NotFound(String),

    #[error("Rate limited (429) - retries exhausted")]
    RateLimited,

    #[error("Server error (5xx): {0}")]
    ServerError(String),

    #[error("Request failed: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

/// Response bodies longer than this are cut in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Cut at a char boundary so multi-byte bodies never panic
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}
