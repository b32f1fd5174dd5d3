use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{ApiRequest, ApiResponse, AuthApi, ResponseClass, Transport};
use crate::store::SecureStore;

use super::refresh::{SessionState, SharedState};
use super::{CredentialStore, RefreshCoordinator, RefreshOutcome, SessionError, UserIdentity};

/// Refresh-and-retry cycles allowed per `authorized_request` call.
/// A second 401 after one refresh is surfaced instead of refreshing again.
pub const MAX_AUTH_RETRIES: u32 = 1;

/// Access token lifetime issued by the server (60 minutes)
const DEFAULT_ACCESS_TOKEN_LIFETIME_MINUTES: i64 = 60;

/// Buffer time before expiry to trigger a proactive refresh (5 minutes)
const DEFAULT_REFRESH_BUFFER_MINUTES: i64 = 5;

/// When to refresh before the server says so.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    /// `None` disables proactive refresh; only a 401 triggers one.
    pub access_token_lifetime: Option<Duration>,
    pub refresh_buffer: Duration,
}

impl RefreshPolicy {
    /// Lifetime to check token age against, if proactive refresh is on.
    /// A buffer that swallows the whole lifetime would refresh before every
    /// request, so that counts as off.
    pub fn proactive_lifetime(&self) -> Option<Duration> {
        self.access_token_lifetime
            .filter(|lifetime| *lifetime > self.refresh_buffer)
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            access_token_lifetime: Some(Duration::minutes(DEFAULT_ACCESS_TOKEN_LIFETIME_MINUTES)),
            refresh_buffer: Duration::minutes(DEFAULT_REFRESH_BUFFER_MINUTES),
        }
    }
}

/// Snapshot for display
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub user: Option<UserIdentity>,
    pub access_token_age: Option<Duration>,
    pub refresh_in_flight: bool,
}

impl SessionStatus {
    pub fn is_logged_in(&self) -> bool {
        self.user.is_some()
    }
}

/// Front door for the UI: login/logout, identity, and authorized requests
/// with transparent refresh-on-401.
///
/// Clone is cheap and every clone shares one session, so it can be handed
/// to as many concurrent tasks as needed.
#[derive(Clone)]
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    api: AuthApi,
    state: SharedState,
    coordinator: RefreshCoordinator,
    policy: RefreshPolicy,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn SecureStore>) -> Self {
        let api = AuthApi::new(Arc::clone(&transport));
        let state = Arc::new(Mutex::new(SessionState::new(CredentialStore::new(store))));
        let coordinator = RefreshCoordinator::new(api.clone(), Arc::clone(&state));

        Self {
            transport,
            api,
            state,
            coordinator,
            policy: RefreshPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Load the persisted session at process start
    pub async fn restore(&self) -> Result<Option<UserIdentity>, SessionError> {
        let mut state = self.state.lock().await;
        state.begin_new_session();
        let user = state.credentials.load()?.map(|s| s.user.clone());

        match user {
            Some(ref user) => info!(user_id = user.user_id, "Restored session"),
            None => debug!("No session to restore"),
        }
        Ok(user)
    }

    /// Log in with email and password.
    ///
    /// Logging in while a session is active is an implicit logout first: the
    /// old session is gone even if the new login fails. Nothing is persisted
    /// unless the server accepts the credentials.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserIdentity, SessionError> {
        {
            let mut state = self.state.lock().await;
            if state.credentials.is_logged_in() {
                info!("Login while a session is active, logging out first");
                state.begin_new_session();
                state.credentials.clear()?;
            }
        }

        let session = self
            .api
            .issue_token(email, password)
            .await
            .map_err(|e| {
                warn!(error = %e, "Login failed");
                SessionError::from_login(e)
            })?;
        let user = session.user.clone();

        let mut state = self.state.lock().await;
        state.begin_new_session();
        state.credentials.save(session)?;

        info!(user_id = user.user_id, "Logged in");
        Ok(user)
    }

    /// Drop the session locally. No server round trip; idempotent.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        let was_logged_in = state.credentials.is_logged_in();
        state.begin_new_session();
        state.credentials.clear()?;

        if was_logged_in {
            info!("Logged out");
        }
        Ok(())
    }

    pub async fn current_user(&self) -> Option<UserIdentity> {
        self.state.lock().await.credentials.current_user().cloned()
    }

    pub async fn current_access_token(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .credentials
            .current_access_token()
            .map(str::to_string)
    }

    pub async fn status(&self) -> SessionStatus {
        let state = self.state.lock().await;
        let session = state.credentials.session();

        SessionStatus {
            user: session.map(|s| s.user.clone()),
            access_token_age: session.and_then(|s| s.access_token_age()),
            refresh_in_flight: state.in_flight.is_some(),
        }
    }

    /// Send `request` with the current access token.
    ///
    /// On 401 the token is refreshed (single-flight, shared with every other
    /// caller hitting 401 at the same time) and the request is re-sent once.
    /// Non-401 responses, successful or not, are returned as-is.
    pub async fn authorized_request(&self, request: &ApiRequest) -> Result<ApiResponse, SessionError> {
        let mut refreshes = 0;
        let mut token = self.current_access_token().await;

        if self.token_is_stale().await {
            debug!("Access token near expiry, refreshing before request");
            refreshes += 1;
            let outcome = self.coordinator.request_refresh(token.as_deref()).await;
            match outcome {
                RefreshOutcome::Refreshed(fresh) => token = Some(fresh),
                RefreshOutcome::Rejected => return Err(SessionError::SessionExpired),
                // The old token may still be accepted; let the server decide.
                // A 401 on it is final since this call already spent its refresh.
                RefreshOutcome::Failed(reason) => {
                    debug!(reason = %reason, "Proactive refresh failed, using current token")
                }
            }
        }

        loop {
            let attempt = request.clone().with_bearer(token.clone());
            let response = self.transport.send(&attempt).await?;

            if response.class() != ResponseClass::Unauthorized {
                return Ok(response);
            }

            if refreshes >= MAX_AUTH_RETRIES {
                warn!(path = %request.path, "Still unauthorized after token refresh");
                return Err(SessionError::RetryExhausted);
            }
            refreshes += 1;

            debug!(path = %request.path, "Unauthorized, refreshing access token");
            let outcome = self.coordinator.request_refresh(token.as_deref()).await;
            token = Some(match outcome {
                RefreshOutcome::Refreshed(fresh) => fresh,
                RefreshOutcome::Rejected if token.is_none() => {
                    return Err(SessionError::NotAuthenticated)
                }
                RefreshOutcome::Rejected => return Err(SessionError::SessionExpired),
                RefreshOutcome::Failed(reason) => {
                    return Err(SessionError::TransientFailure(reason))
                }
            });
        }
    }

    async fn token_is_stale(&self) -> bool {
        let Some(lifetime) = self.policy.proactive_lifetime() else {
            return false;
        };
        let state = self.state.lock().await;
        state
            .credentials
            .session()
            .is_some_and(|s| s.needs_refresh(lifetime, self.policy.refresh_buffer))
    }
}
