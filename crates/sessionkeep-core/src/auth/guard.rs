//! Pre-navigation access check for protected views.

use tracing::{debug, warn};

use super::navigator::LOGIN_ROUTE;
use super::refresh::RefreshCoordinator;

/// Routes reachable without a session
pub const PUBLIC_ROUTES: [&str; 2] = [LOGIN_ROUTE, "/stakeholder"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    RedirectToLogin,
}

impl GuardDecision {
    pub fn is_allowed(self) -> bool {
        self == GuardDecision::Allow
    }
}

#[derive(Clone)]
pub struct RouteGuard {
    coordinator: RefreshCoordinator,
    public_routes: Vec<String>,
}

impl RouteGuard {
    pub fn new(coordinator: RefreshCoordinator) -> Self {
        Self {
            coordinator,
            public_routes: PUBLIC_ROUTES.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn with_public_routes(mut self, routes: &[&str]) -> Self {
        self.public_routes = routes.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn is_protected(&self, route: &str) -> bool {
        let path = route.split(['?', '#']).next().unwrap_or(route);
        !self.public_routes.iter().any(|r| r == path)
    }

    /// Decide whether navigation to `route` may proceed
    pub async fn check_route(&self, route: &str) -> GuardDecision {
        if !self.is_protected(route) {
            return GuardDecision::Allow;
        }
        self.check().await
    }

    /// Session check for a protected view.
    ///
    /// Only an expired token with a refresh token available costs a network
    /// call; every other outcome is decided locally.
    pub async fn check(&self) -> GuardDecision {
        let store = self.coordinator.store();
        let Some(token) = store.access_token() else {
            debug!("No session, redirecting to login");
            return GuardDecision::RedirectToLogin;
        };

        if !self.coordinator.is_token_expired(&token) {
            return GuardDecision::Allow;
        }

        if store.refresh_token().is_none() {
            debug!("Session expired with no refresh token, redirecting to login");
            return GuardDecision::RedirectToLogin;
        }

        match self.coordinator.refresh().await {
            Ok(_) => GuardDecision::Allow,
            Err(e) => {
                warn!(error = %e, "Session refresh during navigation failed");
                GuardDecision::RedirectToLogin
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::auth::store::{CredentialStore, SessionCredential};
    use crate::testing::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_valid_session_allows_without_network() {
        let h = Harness::with_tokens(Duration::seconds(3600), Some("r1"));
        let guard = RouteGuard::new(h.coordinator.clone());

        assert_eq!(guard.check().await, GuardDecision::Allow);
        assert_eq!(h.api.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_session_expiring_over_time_is_refreshed_on_next_check() {
        let h = Harness::with_tokens(Duration::seconds(3600), Some("r1"));
        let guard = RouteGuard::new(h.coordinator.clone());
        assert_eq!(guard.check().await, GuardDecision::Allow);

        let new_token = token_expiring_at(epoch() + Duration::seconds(7200));
        h.api.push_refresh(Ok(auth_response(&new_token, Some("r2"), None)));
        h.clock.advance(Duration::seconds(3601));

        assert_eq!(guard.check().await, GuardDecision::Allow);
        assert_eq!(h.api.refresh_count(), 1);
        assert_eq!(h.store.access_token(), Some(new_token));
    }

    #[tokio::test]
    async fn test_expired_refreshable_session_allows_after_refresh() {
        let h = Harness::with_tokens(Duration::seconds(-60), Some("r1"));
        let new_token = token_expiring_at(epoch() + Duration::seconds(3600));
        h.api.push_refresh(Ok(auth_response(&new_token, Some("r2"), None)));
        let guard = RouteGuard::new(h.coordinator.clone());

        assert_eq!(guard.check().await, GuardDecision::Allow);
        assert_eq!(h.api.refresh_count(), 1);
        assert!(h.coordinator.is_authenticated());
    }

    #[tokio::test]
    async fn test_expired_session_redirects_when_refresh_fails() {
        let h = Harness::with_tokens(Duration::seconds(-60), Some("revoked"));
        h.api.push_refresh(Err(ApiError::Unauthorized));
        let guard = RouteGuard::new(h.coordinator.clone());

        assert_eq!(guard.check().await, GuardDecision::RedirectToLogin);
        assert!(h.store.current().is_none());
    }

    #[tokio::test]
    async fn test_no_session_redirects_without_network() {
        let h = Harness::new(None);
        let guard = RouteGuard::new(h.coordinator.clone());

        assert_eq!(guard.check().await, GuardDecision::RedirectToLogin);
        assert_eq!(h.api.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token_redirects_without_network() {
        let h = Harness::with_tokens(Duration::seconds(-60), None);
        let guard = RouteGuard::new(h.coordinator.clone());

        assert_eq!(guard.check().await, GuardDecision::RedirectToLogin);
        assert_eq!(h.api.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_token_is_treated_as_expired() {
        let h = Harness::new(Some(SessionCredential {
            access_token: "garbage".to_string(),
            refresh_token: Some("r1".to_string()),
            role: None,
        }));
        let new_token = token_expiring_at(epoch() + Duration::seconds(3600));
        h.api.push_refresh(Ok(auth_response(&new_token, Some("r2"), None)));
        let guard = RouteGuard::new(h.coordinator.clone());

        assert_eq!(guard.check().await, GuardDecision::Allow);
        assert_eq!(h.api.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_public_routes_skip_the_check() {
        let h = Harness::new(None);
        let guard = RouteGuard::new(h.coordinator.clone());

        assert!(guard.check_route("/login").await.is_allowed());
        assert!(guard.check_route("/stakeholder?tab=budget").await.is_allowed());
        assert_eq!(guard.check_route("/tasks/7").await, GuardDecision::RedirectToLogin);
        assert_eq!(guard.check_route("/").await, GuardDecision::RedirectToLogin);
    }

    #[tokio::test]
    async fn test_custom_public_routes() {
        let h = Harness::new(None);
        let guard = RouteGuard::new(h.coordinator.clone()).with_public_routes(&["/login"]);

        assert!(!guard.is_protected("/login"));
        assert!(guard.is_protected("/stakeholder"));
    }
}
