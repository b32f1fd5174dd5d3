//! sessionvault - session credential lifecycle for API clients.
//!
//! Logs in against a token endpoint, keeps the resulting access/refresh token
//! pair in a secure store, attaches the access token to outgoing requests, and
//! on a 401 refreshes it exactly once across all concurrent callers before
//! retrying the request a single time.

pub mod api;
pub mod auth;
pub mod config;
pub mod store;

pub use api::{ApiError, ApiRequest, ApiResponse, HttpTransport, ResponseClass, Transport, TransportError};
pub use auth::{RefreshOutcome, Session, SessionError, SessionManager, SessionStatus, UserIdentity};
pub use config::{Config, StoreBackend};
pub use store::{EncryptedFileStore, KeyringStore, MemoryStore, SecureStore, StoreError};
