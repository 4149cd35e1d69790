//! Session facade: login, logout and the observable authenticated flag.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use super::error::AuthError;
use super::guard::RouteGuard;
use super::mediator::RequestMediator;
use super::navigator::Navigator;
use super::refresh::{RefreshCoordinator, RefreshOptions};
use super::store::CredentialStore;
use crate::api::{ApiClient, AuthApi, HttpTransport};

/// One user session and everything that acts on it.
///
/// Cloning shares the same session.
#[derive(Clone)]
pub struct Session {
    coordinator: RefreshCoordinator,
    mediator: RequestMediator,
    guard: RouteGuard,
}

impl Session {
    /// Build a session over an existing store and arm the proactive refresh
    /// for any credential already in it. Must be called inside a tokio runtime.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        api: Arc<dyn AuthApi>,
        transport: Arc<dyn HttpTransport>,
        navigator: Arc<dyn Navigator>,
        options: RefreshOptions,
    ) -> Self {
        let coordinator = RefreshCoordinator::new(store, api, navigator, options);
        coordinator.schedule_refresh();
        Self::with_coordinator(coordinator, transport)
    }

    /// Session whose auth calls and feature requests both go through `client`
    pub fn with_client(
        client: Arc<ApiClient>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        options: RefreshOptions,
    ) -> Self {
        Self::new(store, client.clone(), client, navigator, options)
    }

    pub fn with_coordinator(coordinator: RefreshCoordinator, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            mediator: RequestMediator::new(coordinator.clone(), transport),
            guard: RouteGuard::new(coordinator.clone()),
            coordinator,
        }
    }

    /// Authenticate and install the returned tokens.
    ///
    /// On failure nothing stored is touched.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), AuthError> {
        debug!(username, "Logging in");
        let response = self
            .coordinator
            .api()
            .login(username, password)
            .await
            .map_err(|e| AuthError::Api(Arc::new(e)))?;
        self.coordinator.store_tokens(response)?;
        info!(username, "Logged in");
        Ok(())
    }

    /// Tell the server (best effort) and end the session locally.
    pub async fn logout(&self) {
        let store = self.coordinator.store();
        if store.access_token().is_some() {
            let refresh_token = store.refresh_token();
            if let Err(e) = self.coordinator.api().logout(refresh_token.as_deref()).await {
                warn!(error = %e, "Server logout failed, clearing local session anyway");
            }
        }
        self.coordinator.logout_cascade();
    }

    pub fn authenticated(&self) -> watch::Receiver<bool> {
        self.coordinator.authenticated()
    }

    /// Current flag first, then every change
    pub fn authenticated_stream(&self) -> WatchStream<bool> {
        WatchStream::new(self.coordinator.authenticated())
    }

    pub fn is_logged_in(&self) -> bool {
        self.coordinator.has_valid_token()
    }

    pub fn role(&self) -> Option<String> {
        self.coordinator.store().role()
    }

    pub fn access_token(&self) -> Option<String> {
        self.coordinator.store().access_token()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn mediator(&self) -> &RequestMediator {
        &self.mediator
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }
}
