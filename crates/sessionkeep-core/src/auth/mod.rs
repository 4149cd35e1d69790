//! Session management for a JWT-authenticated API.
//!
//! This module provides:
//! - `CredentialStore`: persisted access token, refresh token and role
//!   (file, OS keyring or in-memory)
//! - `RefreshCoordinator`: single-flight token refresh, proactive refresh
//!   timer and the logout cascade
//! - `RequestMediator`: attaches the bearer token and repairs a 401 once
//! - `RouteGuard`: pre-navigation session check
//! - `Session`: login / logout facade over all of the above
//!
//! Access tokens carry their own expiry in the `exp` claim. A token is
//! refreshed five minutes before it expires, or on demand when a request
//! finds it expired.

pub mod error;
pub mod guard;
pub mod mediator;
pub mod navigator;
pub mod refresh;
pub mod session;
pub mod store;
pub mod token;

pub use error::AuthError;
pub use guard::{GuardDecision, RouteGuard, PUBLIC_ROUTES};
pub use mediator::RequestMediator;
pub use navigator::{LogNavigator, Navigator, LOGIN_ROUTE};
pub use refresh::{RefreshCoordinator, RefreshHandle, RefreshOptions};
pub use session::Session;
pub use store::{CredentialStore, FileStore, KeyringStore, MemoryStore, SessionCredential};
pub use token::{Clock, SystemClock};
