//! Authenticated request path.
//!
//! Every feature request goes through `RequestMediator::send`, which attaches
//! the current access token, renews it when expired, and repairs a single 401
//! by refreshing and retrying once. Requests to the auth endpoints pass
//! through untouched.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::error::AuthError;
use super::refresh::RefreshCoordinator;
use crate::api::{is_auth_path, ApiError, ApiRequest, ApiResponse, HttpTransport};

#[derive(Clone)]
pub struct RequestMediator {
    coordinator: RefreshCoordinator,
    transport: Arc<dyn HttpTransport>,
}

impl RequestMediator {
    pub fn new(coordinator: RefreshCoordinator, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            coordinator,
            transport,
        }
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, AuthError> {
        if is_auth_path(&request.path) {
            debug!(path = %request.path, "Auth endpoint, sending without token");
            return self.send_unmodified(request).await;
        }

        let store = self.coordinator.store();
        let Some(token) = store.access_token() else {
            debug!(path = %request.path, "No access token, sending unauthenticated");
            return self.send_unmodified(request).await;
        };

        let token = if self.coordinator.is_token_expired(&token) {
            if store.refresh_token().is_none() {
                warn!(path = %request.path, "Access token expired with no refresh token");
                self.coordinator.logout_cascade();
                return Err(AuthError::ExpiredNoRefresh);
            }
            debug!(path = %request.path, "Access token expired, refreshing before send");
            self.coordinator.refresh().await?
        } else {
            if self.coordinator.is_token_expiring_soon(&token) && store.refresh_token().is_some() {
                self.refresh_in_background();
            }
            token
        };

        match self.transport.send(request.with_bearer(&token)).await {
            Err(ApiError::Unauthorized) => self.recover_unauthorized(&request, &token).await,
            result => result.map_err(|e| AuthError::Api(Arc::new(e))),
        }
    }

    async fn send_unmodified(&self, request: ApiRequest) -> Result<ApiResponse, AuthError> {
        self.transport
            .send(request)
            .await
            .map_err(|e| AuthError::Api(Arc::new(e)))
    }

    /// Start a refresh without waiting on it; the current request keeps its token.
    fn refresh_in_background(&self) {
        debug!("Access token expiring soon, refreshing in background");
        let handle = self.coordinator.refresh();
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background token refresh failed");
            }
        });
    }

    /// One retry, after a refresh unless another caller already replaced the
    /// token. The retry's outcome is final.
    async fn recover_unauthorized(
        &self,
        request: &ApiRequest,
        sent_token: &str,
    ) -> Result<ApiResponse, AuthError> {
        let store = self.coordinator.store();
        if let Some(current) = store.access_token().filter(|t| t != sent_token) {
            debug!(path = %request.path, "Token replaced while request was in flight, retrying with it");
            return self
                .transport
                .send(request.with_bearer(&current))
                .await
                .map_err(AuthError::from);
        }

        if store.refresh_token().is_none() {
            warn!(path = %request.path, "Request unauthorized and no refresh token");
            self.coordinator.logout_cascade();
            return Err(AuthError::Unauthorized);
        }

        debug!(path = %request.path, "Request unauthorized, refreshing and retrying once");
        let token = self.coordinator.refresh().await?;
        self.transport
            .send(request.with_bearer(&token))
            .await
            .map_err(AuthError::from)
    }

    // ===== Typed helpers =====

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AuthError> {
        let response = self.send(ApiRequest::get(path)).await?;
        Self::decode(&response)
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AuthError> {
        let response = self.send(ApiRequest::post(path, Self::encode(body)?)).await?;
        Self::decode(&response)
    }

    pub async fn patch_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AuthError> {
        let response = self.send(ApiRequest::patch(path, Self::encode(body)?)).await?;
        Self::decode(&response)
    }

    pub async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AuthError> {
        let response = self.send(ApiRequest::put(path, Self::encode(body)?)).await?;
        Self::decode(&response)
    }

    pub async fn delete(&self, path: &str) -> Result<(), AuthError> {
        self.send(ApiRequest::delete(path)).await?;
        Ok(())
    }

    fn encode<B: Serialize>(body: &B) -> Result<serde_json::Value, AuthError> {
        serde_json::to_value(body).map_err(|e| {
            AuthError::Api(Arc::new(ApiError::InvalidResponse(format!(
                "Failed to encode request body: {}",
                e
            ))))
        })
    }

    fn decode<T: DeserializeOwned>(response: &ApiResponse) -> Result<T, AuthError> {
        response.json().map_err(|e| AuthError::Api(Arc::new(e)))
    }
}
