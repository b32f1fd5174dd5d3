//! Client for the token endpoints.
//!
//! `AuthApi` issues a token pair from email/password and mints new access
//! tokens from a refresh token. It speaks through a `Transport`, so the
//! same code runs against the real server and against test doubles.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{Session, UserIdentity};

use super::{ApiError, ApiRequest, Transport};

/// Token-issue endpoint (email + password -> token pair and identity)
const TOKEN_ISSUE_PATH: &str = "api/token/";

/// Token-refresh endpoint (refresh token -> access token)
const TOKEN_REFRESH_PATH: &str = "api/token/refresh/";

#[derive(Debug, Serialize)]
struct TokenIssueRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenIssueResponse {
    access: String,
    refresh: String,
    user_id: i64,
    email: String,
    first_name: String,
    last_name: String,
    employee_id: String,
}

#[derive(Debug, Serialize)]
struct TokenRefreshRequest<'a> {
    refresh: &'a str,
}

/// Result of a successful refresh call. `refresh` is only present when the
/// server rotates refresh tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshedTokens {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

#[derive(Clone)]
pub struct AuthApi {
    transport: Arc<dyn Transport>,
}

impl AuthApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Exchange email/password for a full session
    pub async fn issue_token(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let request = ApiRequest::post(TOKEN_ISSUE_PATH, &TokenIssueRequest { email, password })?;
        let response = self.transport.send(&request).await?.error_for_status()?;
        let issued: TokenIssueResponse = response.json()?;

        if issued.access.is_empty() || issued.refresh.is_empty() {
            return Err(ApiError::InvalidResponse(
                "Token response is missing a token".to_string(),
            ));
        }

        debug!(user_id = issued.user_id, "Token pair issued");

        Ok(Session::new(
            issued.access,
            issued.refresh,
            UserIdentity {
                user_id: issued.user_id,
                email: issued.email,
                first_name: issued.first_name,
                last_name: issued.last_name,
                employee_id: issued.employee_id,
            },
        ))
    }

    /// Mint a new access token. 400/401 means the refresh token itself is dead.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshedTokens, ApiError> {
        let request = ApiRequest::post(
            TOKEN_REFRESH_PATH,
            &TokenRefreshRequest {
                refresh: refresh_token,
            },
        )?;
        let response = self.transport.send(&request).await?.error_for_status()?;
        let tokens: RefreshedTokens = response.json()?;

        if tokens.access.is_empty() {
            return Err(ApiError::InvalidResponse(
                "Refresh response is missing the access token".to_string(),
            ));
        }

        debug!(rotated = tokens.refresh.is_some(), "Access token refreshed");
        Ok(tokens)
    }
}
