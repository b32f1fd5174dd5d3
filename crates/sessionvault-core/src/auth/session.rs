use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Who the session belongs to. Persisted as the `user` record; immutable for
/// the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub employee_id: String,
}

impl UserIdentity {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// An authenticated session: both tokens plus the identity they belong to.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserIdentity,
    /// When this process obtained the access token. `None` after a restore,
    /// since the persisted layout does not carry it.
    pub access_token_issued_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(access_token: String, refresh_token: String, user: UserIdentity) -> Self {
        Self {
            access_token,
            refresh_token,
            user,
            access_token_issued_at: Some(Utc::now()),
        }
    }

    /// Same identity with a freshly minted access token, and the rotated
    /// refresh token if the server sent one.
    pub fn with_access_token(&self, access_token: String, rotated_refresh: Option<String>) -> Self {
        Self {
            access_token,
            refresh_token: rotated_refresh.unwrap_or_else(|| self.refresh_token.clone()),
            user: self.user.clone(),
            access_token_issued_at: Some(Utc::now()),
        }
    }

    pub fn access_token_age(&self) -> Option<Duration> {
        self.access_token_issued_at.map(|issued| Utc::now() - issued)
    }

    /// Check if the access token will expire soon and should be refreshed.
    /// Unknown age never triggers a refresh; the server's 401 covers that case.
    pub fn needs_refresh(&self, lifetime: Duration, buffer: Duration) -> bool {
        match self.access_token_issued_at {
            Some(issued) => issued
                .checked_add_signed(lifetime)
                .and_then(|expiry| expiry.checked_sub_signed(buffer))
                .is_some_and(|refresh_at| Utc::now() > refresh_at),
            None => false,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("user", &self.user)
            .field("access_token_issued_at", &self.access_token_issued_at)
            .finish()
    }
}
