//! Single-flight access token refresh.
//!
//! However many callers ask for a refresh at once, one refresh call goes out and
//! every caller gets its outcome. The in-flight marker lives in `SessionState`
//! next to the credentials, so testing/setting the marker, joining a running
//! refresh, and writing the refreshed session all happen under one lock. The
//! lock is never held across the network call itself.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::AuthApi;

use super::CredentialStore;

/// Outcome of one refresh cycle, delivered identically to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New access token, already saved
    Refreshed(String),
    /// The refresh token was rejected (or there is no session); the session is gone
    Rejected,
    /// Network/server trouble; session untouched, a later caller may try again
    Failed(String),
}

pub(crate) type RefreshFlight = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Everything guarded by the session lock.
pub(crate) struct SessionState {
    pub(crate) credentials: CredentialStore,
    pub(crate) in_flight: Option<RefreshFlight>,
    /// Bumped whenever the session is replaced or dropped by anything other
    /// than a refresh. A refresh started under an older epoch is discarded.
    pub(crate) epoch: u64,
}

impl SessionState {
    pub(crate) fn new(credentials: CredentialStore) -> Self {
        Self {
            credentials,
            in_flight: None,
            epoch: 0,
        }
    }

    /// Called on login, logout and restore. Detaches any running refresh so
    /// callers of the new session start their own cycle instead of joining
    /// one that belongs to the old session.
    pub(crate) fn begin_new_session(&mut self) {
        self.epoch += 1;
        self.in_flight = None;
    }
}

pub(crate) type SharedState = Arc<Mutex<SessionState>>;

#[derive(Clone)]
pub struct RefreshCoordinator {
    api: AuthApi,
    state: SharedState,
}

impl RefreshCoordinator {
    pub(crate) fn new(api: AuthApi, state: SharedState) -> Self {
        Self { api, state }
    }

    /// Get a fresh access token to replace `stale_token` (the token the caller
    /// just had rejected, `None` if it sent none).
    ///
    /// Joins the running refresh if there is one. If the current token already
    /// differs from `stale_token`, another cycle finished first and the current
    /// token is returned without a network call.
    pub async fn request_refresh(&self, stale_token: Option<&str>) -> RefreshOutcome {
        let flight = {
            let mut state = self.state.lock().await;

            if let Some(flight) = state.in_flight.clone() {
                debug!("Joining in-flight token refresh");
                flight
            } else {
                let Some(session) = state.credentials.session() else {
                    debug!("No session to refresh");
                    return RefreshOutcome::Rejected;
                };

                if stale_token != Some(session.access_token.as_str()) {
                    debug!("Access token already replaced, skipping refresh");
                    return RefreshOutcome::Refreshed(session.access_token.clone());
                }

                let flight = run_refresh(
                    self.api.clone(),
                    Arc::clone(&self.state),
                    session.refresh_token.clone(),
                    state.epoch,
                )
                .boxed()
                .shared();
                state.in_flight = Some(flight.clone());
                flight
            }
        };

        flight.await
    }

    /// Whether a refresh is currently running
    pub async fn is_refreshing(&self) -> bool {
        self.state.lock().await.in_flight.is_some()
    }
}

/// One refresh cycle. Any waiter polling the shared future drives it, so the
/// cycle completes (and clears the marker) even if the initiator goes away.
async fn run_refresh(
    api: AuthApi,
    state: SharedState,
    refresh_token: String,
    epoch: u64,
) -> RefreshOutcome {
    debug!("Refreshing access token");
    let result = api.refresh_token(&refresh_token).await;

    let mut state = state.lock().await;

    if state.epoch != epoch {
        // Logout or re-login happened meanwhile; that wins over this result.
        warn!("Session changed during token refresh, discarding result");
        return match state.credentials.current_access_token() {
            Some(token) => RefreshOutcome::Refreshed(token.to_string()),
            None => RefreshOutcome::Rejected,
        };
    }
    // Same epoch, so the marker is this cycle's own
    state.in_flight = None;

    match result {
        Ok(tokens) => {
            let Some(current) = state.credentials.session() else {
                return RefreshOutcome::Rejected;
            };
            let refreshed = current.with_access_token(tokens.access, tokens.refresh);
            let access_token = refreshed.access_token.clone();

            match state.credentials.save(refreshed) {
                Ok(()) => {
                    info!("Access token refreshed");
                    RefreshOutcome::Refreshed(access_token)
                }
                Err(e) => {
                    warn!(error = %e, "Failed to persist refreshed access token");
                    RefreshOutcome::Failed(format!("Could not save refreshed token: {}", e))
                }
            }
        }
        Err(e) if e.is_credential_rejection() => {
            warn!("Refresh token rejected, ending session");
            if let Err(e) = state.credentials.clear() {
                warn!(error = %e, "Failed to clear persisted session");
            }
            state.begin_new_session();
            RefreshOutcome::Rejected
        }
        Err(e) => {
            warn!(error = %e, "Token refresh failed");
            RefreshOutcome::Failed(e.to_string())
        }
    }
}
