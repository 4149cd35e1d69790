//! Single-flight token refresh with proactive renewal.
//!
//! `RefreshCoordinator` is the only component that calls the refresh
//! endpoint. It owns:
//! - the in-flight refresh operation, shared by every concurrent caller
//! - the proactive refresh timer (at most one armed at a time)
//! - the authenticated flag broadcast to observers
//! - the logout cascade
//!
//! Every session change (login, logout) bumps a generation counter. A refresh
//! that settles under an older generation is discarded, so a late response
//! can never bring a logged-out session back.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::error::AuthError;
use super::navigator::Navigator;
use super::store::{CredentialStore, SessionCredential};
use super::token::{self, Clock, SystemClock, DEFAULT_REFRESH_MARGIN_SECS};
use crate::api::{AuthApi, AuthResponse};

/// Handle on a refresh operation. Resolves to the new access token.
pub type RefreshHandle = Shared<BoxFuture<'static, Result<String, AuthError>>>;

pub struct RefreshOptions {
    /// How long before expiry a token is renewed
    pub margin: Duration,
    pub clock: Arc<dyn Clock>,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            margin: Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
            clock: Arc::new(SystemClock),
        }
    }
}

struct InFlight {
    id: u64,
    handle: RefreshHandle,
}

#[derive(Default)]
struct RefreshState {
    in_flight: Option<InFlight>,
    timer: Option<AbortHandle>,
    generation: u64,
    next_id: u64,
}

struct CoordinatorInner {
    store: Arc<dyn CredentialStore>,
    api: Arc<dyn AuthApi>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    margin: Duration,
    authenticated: watch::Sender<bool>,
    state: Mutex<RefreshState>,
}

/// Clone is cheap; all clones share one session.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        api: Arc<dyn AuthApi>,
        navigator: Arc<dyn Navigator>,
        options: RefreshOptions,
    ) -> Self {
        let now = options.clock.now();
        let valid = store
            .access_token()
            .map(|t| !token::is_expired(&t, now))
            .unwrap_or(false);
        let (authenticated, _) = watch::channel(valid);
        debug!(authenticated = valid, "Refresh coordinator initialised");

        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                api,
                navigator,
                clock: options.clock,
                margin: options.margin,
                authenticated,
                state: Mutex::new(RefreshState::default()),
            }),
        }
    }

    pub fn store(&self) -> &dyn CredentialStore {
        self.inner.store.as_ref()
    }

    pub fn api(&self) -> &dyn AuthApi {
        self.inner.api.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn margin(&self) -> Duration {
        self.inner.margin
    }

    pub fn is_token_expired(&self, token: &str) -> bool {
        token::is_expired(token, self.now())
    }

    pub fn is_token_expiring_soon(&self, token: &str) -> bool {
        token::is_expiring_soon(token, self.now(), self.inner.margin)
    }

    /// Stored access token that has not yet expired
    pub fn has_valid_token(&self) -> bool {
        self.store()
            .access_token()
            .is_some_and(|t| !self.is_token_expired(&t))
    }

    pub fn authenticated(&self) -> watch::Receiver<bool> {
        self.inner.authenticated.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        *self.inner.authenticated.borrow()
    }

    /// Start a refresh, or join the one already in flight.
    ///
    /// The operation is registered before this returns, so every caller in
    /// the same tick shares it. The network call runs on its own task and
    /// completes even if every holder of the handle is dropped.
    pub fn refresh(&self) -> RefreshHandle {
        let mut state = self.inner.state.lock();
        if let Some(ref op) = state.in_flight {
            debug!(id = op.id, "Joining in-flight token refresh");
            return op.handle.clone();
        }

        let Some(refresh_token) = self.inner.store.refresh_token() else {
            warn!("Refresh requested without a refresh token, ending session");
            let had_session = self.end_session_locked(&mut state);
            drop(state);
            if had_session {
                self.inner.navigator.go_to_login();
            }
            return futures::future::ready(Err(AuthError::NoRefreshToken))
                .boxed()
                .shared();
        };

        state.next_id += 1;
        let id = state.next_id;
        let generation = state.generation;
        let coordinator = self.clone();
        let handle = async move { coordinator.run_refresh(id, generation, refresh_token).await }
            .boxed()
            .shared();
        state.in_flight = Some(InFlight {
            id,
            handle: handle.clone(),
        });
        drop(state);

        debug!(id, "Starting token refresh");
        tokio::spawn(handle.clone());
        handle
    }

    async fn run_refresh(
        self,
        id: u64,
        generation: u64,
        refresh_token: String,
    ) -> Result<String, AuthError> {
        let result = self.inner.api.refresh(&refresh_token).await;
        let previous_role = self.inner.store.role();

        let mut state = self.inner.state.lock();
        if state.in_flight.as_ref().is_some_and(|op| op.id == id) {
            state.in_flight = None;
        }
        if state.generation != generation {
            drop(state);
            info!(id, "Session changed while refresh was in flight, discarding result");
            return Err(AuthError::SessionEnded);
        }

        match result {
            Ok(response) => {
                let credential = SessionCredential {
                    access_token: response.token,
                    // Servers that do not rotate keep the current refresh token valid
                    refresh_token: response.refresh_token.or(Some(refresh_token)),
                    role: response.role.or(previous_role),
                };
                // Fail closed: the previous refresh token may already be spent
                if let Err(e) = self.inner.store.save(&credential) {
                    error!(id, error = %e, "Failed to persist refreshed credentials, ending session");
                    let had_session = self.end_session_locked(&mut state);
                    drop(state);
                    if had_session {
                        self.inner.navigator.go_to_login();
                    }
                    return Err(AuthError::Storage(e.to_string()));
                }
                self.inner
                    .authenticated
                    .send_if_modified(|v| !std::mem::replace(v, true));
                self.arm_timer_locked(&mut state, &credential);
                drop(state);

                info!(id, "Access token refreshed");
                Ok(credential.access_token)
            }
            Err(e) => {
                error!(id, error = %e, "Token refresh failed, ending session");
                let had_session = self.end_session_locked(&mut state);
                drop(state);
                if had_session {
                    self.inner.navigator.go_to_login();
                }
                Err(AuthError::RefreshRejected(Arc::new(e)))
            }
        }
    }

    /// Install tokens from a login response and arm the proactive timer.
    ///
    /// Any refresh still in flight for an earlier session is discarded.
    pub fn store_tokens(&self, response: AuthResponse) -> Result<(), AuthError> {
        let credential = SessionCredential {
            access_token: response.token,
            refresh_token: response.refresh_token,
            role: response.role,
        };

        let mut state = self.inner.state.lock();
        state.generation += 1;
        state.in_flight = None;
        self.inner
            .store
            .save(&credential)
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        self.inner
            .authenticated
            .send_if_modified(|v| !std::mem::replace(v, true));
        self.arm_timer_locked(&mut state, &credential);
        Ok(())
    }

    /// Arm the proactive timer for whatever credential is currently stored.
    pub fn schedule_refresh(&self) {
        let mut state = self.inner.state.lock();
        match self.inner.store.current() {
            Some(credential) => self.arm_timer_locked(&mut state, &credential),
            None => {
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
            }
        }
    }

    fn arm_timer_locked(&self, state: &mut RefreshState, credential: &SessionCredential) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let Some(expiry) = token::expiry_of(&credential.access_token) else {
            debug!("Access token has no readable expiry, proactive refresh not armed");
            return;
        };

        let until_refresh = (expiry - self.inner.margin) - self.now();
        let delay = match until_refresh.to_std() {
            Ok(delay) if !delay.is_zero() => delay,
            _ => {
                if credential.refresh_token.is_none() {
                    debug!("Token inside refresh margin without a refresh token, leaving it to the request path");
                    return;
                }
                std::time::Duration::ZERO
            }
        };

        debug!(delay_secs = delay.as_secs(), "Proactive refresh armed");
        let deadline = tokio::time::Instant::now() + delay;
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            debug!("Proactive refresh timer fired");
            if let Err(e) = (RefreshCoordinator { inner }).refresh().await {
                warn!(error = %e, "Proactive token refresh failed");
            }
        });
        state.timer = Some(task.abort_handle());
    }

    /// Clear credentials, cancel the timer, drop the flag and send the user
    /// to the login entry point. Safe to call on an already-ended session.
    pub fn logout_cascade(&self) {
        let had_session = {
            let mut state = self.inner.state.lock();
            self.end_session_locked(&mut state)
        };
        if had_session {
            self.inner.navigator.go_to_login();
        }
    }

    /// Returns whether there was a session to end.
    fn end_session_locked(&self, state: &mut RefreshState) -> bool {
        state.generation += 1;
        state.in_flight = None;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let had_credential = self.inner.store.access_token().is_some();
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        let was_authenticated = self
            .inner
            .authenticated
            .send_if_modified(|v| std::mem::replace(v, false));

        if had_credential || was_authenticated {
            info!("Session ended");
            true
        } else {
            debug!("Session already ended");
            false
        }
    }

    #[cfg(test)]
    pub(crate) fn has_refresh_in_flight(&self) -> bool {
        self.inner.state.lock().in_flight.is_some()
    }

    #[cfg(test)]
    pub(crate) fn has_timer(&self) -> bool {
        self.inner.state.lock().timer.is_some()
    }
}
