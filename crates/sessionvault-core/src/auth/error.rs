use thiserror::Error;

use crate::api::{ApiError, TransportError};
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Temporary failure: {0}")]
    TransientFailure(String),

    #[error("Request still unauthorized after refreshing the access token")]
    RetryExhausted,

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("Secure storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl SessionError {
    /// Map a token-issue failure. Rejections mean bad credentials; anything
    /// that might succeed on a later attempt is transient.
    pub(crate) fn from_login(e: ApiError) -> Self {
        match e {
            ApiError::Unauthorized | ApiError::BadRequest(_) | ApiError::AccessDenied(_) => {
                SessionError::InvalidCredentials
            }
            ApiError::InvalidResponse(msg) => SessionError::InvalidResponse(msg),
            other => SessionError::TransientFailure(other.to_string()),
        }
    }

    /// The user has to log in again before anything will work
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            SessionError::SessionExpired | SessionError::NotAuthenticated
        )
    }

    /// Retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::TransientFailure(_))
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::TransientFailure(e.to_string())
    }
}
