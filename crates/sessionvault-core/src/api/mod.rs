//! REST API plumbing.
//!
//! This module provides the `Transport` seam the session layer sends through,
//! its reqwest implementation `HttpTransport`, and `AuthApi` for the
//! token-issue and token-refresh endpoints.
//!
//! The API uses JWT bearer tokens: a short-lived access token on every call and
//! a long-lived refresh token used only to mint new access tokens.

pub mod client;
pub mod error;
pub mod transport;

pub use client::{AuthApi, RefreshedTokens};
pub use error::{ApiError, TransportError};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ResponseClass, Transport};
