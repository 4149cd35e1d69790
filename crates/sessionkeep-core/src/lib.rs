//! Client-side session keeping for a JWT-authenticated REST API.
//!
//! `sessionkeep-core` keeps a user logged in against an API that issues a
//! short-lived access token and a longer-lived refresh token. It renews the
//! access token before it expires, repairs requests that come back `401`,
//! and ends the session cleanly when the tokens can no longer be renewed.

pub mod api;
pub mod auth;
pub mod config;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse};
pub use auth::{AuthError, GuardDecision, Session};
pub use config::Config;
