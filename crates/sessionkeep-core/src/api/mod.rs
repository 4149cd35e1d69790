//! REST API module.
//!
//! This module provides the wire types for the authentication endpoints,
//! the `AuthApi` / `HttpTransport` capability traits the session core
//! depends on, and `ApiClient`, the reqwest implementation of both.
//!
//! The API uses JWT bearer token authentication obtained from
//! `POST /auth/login` and renewed through `POST /auth/refresh`.

pub mod client;
pub mod error;
pub mod traits;
pub mod types;

pub use client::ApiClient;
pub use error::ApiError;
pub use traits::{AuthApi, HttpTransport};
pub use types::{is_auth_path, ApiRequest, ApiResponse, AuthResponse};
