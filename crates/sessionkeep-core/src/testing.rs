//! In-memory fakes for the session capability traits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::api::{ApiError, ApiRequest, ApiResponse, AuthApi, AuthResponse, HttpTransport};
use crate::auth::navigator::Navigator;
use crate::auth::refresh::{RefreshCoordinator, RefreshOptions};
use crate::auth::store::{CredentialStore, MemoryStore, SessionCredential};
use crate::auth::token::Clock;

pub use crate::auth::token::testing::token_expiring_at;

pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

pub fn auth_response(token: &str, refresh_token: Option<&str>, role: Option<&str>) -> AuthResponse {
    AuthResponse {
        token: token.to_string(),
        refresh_token: refresh_token.map(str::to_string),
        role: role.map(str::to_string),
        expires_in: Some(3600),
    }
}

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    redirects: AtomicUsize,
}

impl RecordingNavigator {
    pub fn redirects(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}

impl Navigator for RecordingNavigator {
    fn go_to_login(&self) {
        self.redirects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted auth server. Unscripted calls fail with a server error.
#[derive(Default)]
pub struct FakeAuthApi {
    login_results: Mutex<VecDeque<Result<AuthResponse, ApiError>>>,
    refresh_results: Mutex<VecDeque<Result<AuthResponse, ApiError>>>,
    refresh_gate: Mutex<Option<Arc<Semaphore>>>,
    logout_fails: Mutex<bool>,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub refresh_tokens_seen: Mutex<Vec<String>>,
    pub logout_tokens_seen: Mutex<Vec<Option<String>>>,
}

impl FakeAuthApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_login(&self, result: Result<AuthResponse, ApiError>) {
        self.login_results.lock().push_back(result);
    }

    pub fn push_refresh(&self, result: Result<AuthResponse, ApiError>) {
        self.refresh_results.lock().push_back(result);
    }

    /// Make refresh calls wait until `release_refresh` is called
    pub fn hold_refresh(&self) {
        *self.refresh_gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_refresh(&self) {
        if let Some(gate) = self.refresh_gate.lock().as_ref() {
            gate.add_permits(1024);
        }
    }

    pub fn fail_logout(&self) {
        *self.logout_fails.lock() = true;
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn login_count(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    fn unscripted(call: &str) -> ApiError {
        ApiError::ServerError(format!("no scripted {} response", call))
    }
}

#[async_trait]
impl AuthApi for FakeAuthApi {
    async fn login(&self, _username: &str, _password: &str) -> Result<AuthResponse, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Self::unscripted("login")))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens_seen.lock().push(refresh_token.to_string());
        let gate = self.refresh_gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        self.refresh_results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Self::unscripted("refresh")))
    }

    async fn logout(&self, refresh_token: Option<&str>) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.logout_tokens_seen.lock().push(refresh_token.map(str::to_string));
        if *self.logout_fails.lock() {
            return Err(ApiError::ServerError("logout unavailable".to_string()));
        }
        Ok(())
    }
}

/// Scripted resource server. Unscripted requests answer `200 {}`.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<VecDeque<Result<ApiResponse, ApiError>>>,
    pub requests: Mutex<Vec<ApiRequest>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, result: Result<ApiResponse, ApiError>) {
        self.responses.lock().push_back(result);
    }

    pub fn push_ok(&self, body: &str) {
        self.push(Ok(ApiResponse {
            status: 200,
            body: body.to_string(),
        }));
    }

    pub fn sent(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    pub fn bearers(&self) -> Vec<Option<String>> {
        self.requests.lock().iter().map(|r| r.bearer.clone()).collect()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.requests.lock().push(request);
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Ok(ApiResponse {
                status: 200,
                body: "{}".to_string(),
            })
        })
    }
}

/// Memory store whose writes can be made to fail
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_saves: AtomicBool,
}

impl FlakyStore {
    pub fn with_credential(credential: SessionCredential) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::with_credential(credential),
            fail_saves: AtomicBool::new(false),
        })
    }

    pub fn fail_saves(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }
}

impl CredentialStore for FlakyStore {
    fn load(&self) -> anyhow::Result<Option<SessionCredential>> {
        self.inner.load()
    }

    fn save(&self, credential: &SessionCredential) -> anyhow::Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.save(credential)
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.inner.clear()
    }
}

/// Coordinator wired to fakes, with the clock fixed at `epoch()`
pub struct Harness {
    pub coordinator: RefreshCoordinator,
    pub api: Arc<FakeAuthApi>,
    pub store: Arc<MemoryStore>,
    pub navigator: Arc<RecordingNavigator>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new(credential: Option<SessionCredential>) -> Self {
        let api = FakeAuthApi::new();
        let store = Arc::new(match credential {
            Some(credential) => MemoryStore::with_credential(credential),
            None => MemoryStore::new(),
        });
        let navigator = Arc::new(RecordingNavigator::default());
        let clock = FixedClock::new(epoch());
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            api.clone(),
            navigator.clone(),
            RefreshOptions {
                margin: Duration::seconds(300),
                clock: clock.clone(),
            },
        );
        Self {
            coordinator,
            api,
            store,
            navigator,
            clock,
        }
    }

    /// Stored ADMIN session whose access token expires `expires_in` from `epoch()`
    pub fn with_tokens(expires_in: Duration, refresh_token: Option<&str>) -> Self {
        Self::new(Some(SessionCredential {
            access_token: token_expiring_at(epoch() + expires_in),
            refresh_token: refresh_token.map(str::to_string),
            role: Some("ADMIN".to_string()),
        }))
    }
}
