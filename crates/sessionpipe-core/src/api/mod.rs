//! Session-aware REST client.
//!
//! This module provides the `ApiClient`, which attaches the stored bearer
//! token to every outbound request, renews an expired token once per
//! failing request using the stored refresh token, and classifies failures
//! into `ApiError` values that carry both a user-facing message and the
//! original response.

pub mod client;
pub mod error;
pub mod request;

pub use client::{ApiClient, CsrfTokenSource, TokenGrant};
pub use error::{ApiError, ErrorResponse};
pub use request::{ApiRequest, ApiResponse};
