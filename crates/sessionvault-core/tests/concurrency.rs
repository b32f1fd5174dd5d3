//! Concurrent callers racing on an expired access token.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::StatusCode;
use serde_json::json;
use sessionvault_core::store::ACCESS_TOKEN_KEY;
use sessionvault_core::{
    ApiRequest, ApiResponse, MemoryStore, RefreshOutcome, SecureStore, SessionError,
    SessionManager, Transport, TransportError,
};

#[derive(Debug, Clone, Copy)]
enum RefreshMode {
    Succeed,
    Reject,
}

/// In-process API: accepts exactly one access token at a time and mints a
/// new one (T2, T3, ...) on each refresh call, after a delay.
struct FakeApi {
    valid_token: Mutex<String>,
    refresh_calls: AtomicUsize,
    refresh_delay: Duration,
    mode: RefreshMode,
}

impl FakeApi {
    fn new(mode: RefreshMode, refresh_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            valid_token: Mutex::new(String::new()),
            refresh_calls: AtomicUsize::new(0),
            refresh_delay,
            mode,
        })
    }

    /// Server-side expiry: the issued access token stops working
    fn expire_access_token(&self) {
        *self.valid_token.lock().unwrap() = "expired".to_string();
    }

    fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeApi {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        match request.path.as_str() {
            "api/token/" => {
                *self.valid_token.lock().unwrap() = "T1".to_string();
                let body = json!({
                    "access": "T1", "refresh": "R1", "user_id": 7, "email": "a@b.com",
                    "first_name": "Ada", "last_name": "Byron", "employee_id": "EMP-007"
                });
                Ok(ApiResponse::new(StatusCode::OK, body.to_string()))
            }
            "api/token/refresh/" => {
                let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(self.refresh_delay).await;

                match self.mode {
                    RefreshMode::Succeed => {
                        let token = format!("T{}", call + 1);
                        *self.valid_token.lock().unwrap() = token.clone();
                        let body = json!({ "access": token });
                        Ok(ApiResponse::new(StatusCode::OK, body.to_string()))
                    }
                    RefreshMode::Reject => Ok(ApiResponse::new(
                        StatusCode::UNAUTHORIZED,
                        r#"{"detail": "Token is invalid or expired"}"#,
                    )),
                }
            }
            _ => {
                let valid = self.valid_token.lock().unwrap().clone();
                if request.bearer.as_deref() == Some(valid.as_str()) {
                    Ok(ApiResponse::new(StatusCode::OK, "ok"))
                } else {
                    Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, ""))
                }
            }
        }
    }
}

async fn logged_in_manager(api: &Arc<FakeApi>, store: &MemoryStore) -> SessionManager {
    let manager = SessionManager::new(api.clone(), Arc::new(store.clone()));
    manager.login("a@b.com", "x").await.unwrap();
    manager
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_401s_share_one_refresh() {
    let api = FakeApi::new(RefreshMode::Succeed, Duration::from_millis(50));
    let store = MemoryStore::new();
    let manager = logged_in_manager(&api, &store).await;
    api.expire_access_token();

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move {
                let request = ApiRequest::get(format!("api/loans/{}/", i));
                manager.authorized_request(&request).await
            })
        })
        .collect();

    for result in join_all(tasks).await {
        let response = result.unwrap().unwrap();
        assert!(response.is_success());
    }

    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("T2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_401s_share_one_rejection() {
    let api = FakeApi::new(RefreshMode::Reject, Duration::from_millis(50));
    let store = MemoryStore::new();
    let manager = logged_in_manager(&api, &store).await;
    api.expire_access_token();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .authorized_request(&ApiRequest::get("api/clients/"))
                    .await
            })
        })
        .collect();

    for result in join_all(tasks).await {
        // Every caller either saw the rejection or found the session already gone
        assert!(result.unwrap().unwrap_err().requires_login());
    }

    assert_eq!(api.refresh_calls(), 1);
    assert!(store.is_empty());
    assert!(manager.current_user().await.is_none());
}

#[tokio::test]
async fn test_waiters_joining_mid_flight_get_same_outcome() {
    let api = FakeApi::new(RefreshMode::Succeed, Duration::from_millis(50));
    let store = MemoryStore::new();
    let manager = logged_in_manager(&api, &store).await;
    let coordinator = manager.refresh_coordinator();

    let outcomes = join_all((0..8).map(|_| coordinator.request_refresh(Some("T1")))).await;

    assert_eq!(api.refresh_calls(), 1);
    for outcome in outcomes {
        assert_eq!(outcome, RefreshOutcome::Refreshed("T2".to_string()));
    }
    assert!(!coordinator.is_refreshing().await);
}

#[tokio::test]
async fn test_late_caller_with_stale_token_skips_refresh() {
    let api = FakeApi::new(RefreshMode::Succeed, Duration::from_millis(1));
    let store = MemoryStore::new();
    let manager = logged_in_manager(&api, &store).await;
    let coordinator = manager.refresh_coordinator();

    assert_eq!(
        coordinator.request_refresh(Some("T1")).await,
        RefreshOutcome::Refreshed("T2".to_string())
    );

    // Its request went out with T1 before the refresh landed
    assert_eq!(
        coordinator.request_refresh(Some("T1")).await,
        RefreshOutcome::Refreshed("T2".to_string())
    );
    assert_eq!(api.refresh_calls(), 1);
}

#[tokio::test]
async fn test_abandoned_initiator_does_not_strand_refresh() {
    let api = FakeApi::new(RefreshMode::Succeed, Duration::from_millis(100));
    let store = MemoryStore::new();
    let manager = logged_in_manager(&api, &store).await;

    let initiator = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .refresh_coordinator()
                .request_refresh(Some("T1"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    initiator.abort();
    assert!(manager.refresh_coordinator().is_refreshing().await);

    let outcome = manager
        .refresh_coordinator()
        .request_refresh(Some("T1"))
        .await;
    assert_eq!(outcome, RefreshOutcome::Refreshed("T2".to_string()));
    assert_eq!(api.refresh_calls(), 1);
    assert!(!manager.refresh_coordinator().is_refreshing().await);
}

#[tokio::test]
async fn test_logout_during_refresh_is_not_undone() {
    let api = FakeApi::new(RefreshMode::Succeed, Duration::from_millis(100));
    let store = MemoryStore::new();
    let manager = logged_in_manager(&api, &store).await;
    api.expire_access_token();

    let request = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .authorized_request(&ApiRequest::get("api/loans/"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.logout().await.unwrap();

    let result = request.await.unwrap();
    assert!(matches!(result, Err(SessionError::SessionExpired)));
    assert!(store.is_empty());
    assert!(manager.current_access_token().await.is_none());
}

#[tokio::test]
async fn test_unrelated_requests_do_not_wait_on_refresh() {
    let api = FakeApi::new(RefreshMode::Succeed, Duration::from_millis(300));
    let store = MemoryStore::new();
    let manager = logged_in_manager(&api, &store).await;

    // Refresh in flight for a token nobody is using any more
    let refreshing = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .refresh_coordinator()
                .request_refresh(Some("T1"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // T1 is still accepted by the server, so this must not block behind the refresh
    let started = tokio::time::Instant::now();
    let response = tokio::time::timeout(
        Duration::from_millis(200),
        manager.authorized_request(&ApiRequest::get("api/clients/")),
    )
    .await
    .expect("request waited on the in-flight refresh")
    .unwrap();
    assert!(response.is_success());
    assert!(started.elapsed() < Duration::from_millis(200));

    refreshing.await.unwrap();
}

#[tokio::test]
async fn test_relogin_detaches_refresh_of_previous_session() {
    let api = FakeApi::new(RefreshMode::Succeed, Duration::from_millis(200));
    let store = MemoryStore::new();
    let manager = logged_in_manager(&api, &store).await;

    // Refresh for the first session, still running when the user logs in again
    let old_refresh = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .refresh_coordinator()
                .request_refresh(Some("T1"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    manager.login("a@b.com", "x").await.unwrap();
    assert!(!manager.refresh_coordinator().is_refreshing().await);
    api.expire_access_token();

    // The new session's 401 must run its own refresh, not join the old one
    let response = manager
        .authorized_request(&ApiRequest::get("api/loans/"))
        .await
        .unwrap();
    assert!(response.is_success());
    assert_eq!(api.refresh_calls(), 2);
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("T3"));

    // The stale cycle finished without touching the new session
    old_refresh.await.unwrap();
    assert!(!manager.refresh_coordinator().is_refreshing().await);
    assert_eq!(
        manager.current_access_token().await.as_deref(),
        Some("T3")
    );
}
