//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `Session`: token pair plus the identity it belongs to
//! - `CredentialStore`: the in-memory session, mirrored to a `SecureStore`
//! - `RefreshCoordinator`: single-flight access token refresh
//! - `SessionManager`: login, logout, and authorized requests with refresh-on-401
//!
//! Access tokens expire after 60 minutes; refresh tokens last a day.

pub mod credentials;
pub mod error;
pub mod manager;
pub mod refresh;
pub mod session;

pub use credentials::CredentialStore;
pub use error::SessionError;
pub use manager::{RefreshPolicy, SessionManager, SessionStatus, MAX_AUTH_RETRIES};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use session::{Session, UserIdentity};
